pub mod intake;

pub use intake::{intake, IntakeReceiver, StreamProducer};
