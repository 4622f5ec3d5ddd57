pub mod expansion_queue_repository;
pub mod slot;

pub use expansion_queue_repository::ExpansionQueueRepository;
pub use slot::SlotRepository;
