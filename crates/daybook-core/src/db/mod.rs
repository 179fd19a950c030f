//! Embedded record store: connection, migrations, table managers, and the
//! deletion log

mod connection;
mod deletion_log;
mod migrations;
mod table;

pub use connection::Store;
pub use deletion_log::DeletionLog;
pub use table::{TableManager, WriteOrigin};
