pub mod batch_repo;
pub mod generation_repo;
pub mod ledger_repo;

pub use batch_repo::BatchRepo;
pub use generation_repo::GenerationRepo;
pub use ledger_repo::LedgerRepo;
