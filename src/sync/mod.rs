pub mod broker;
pub mod extract;
pub mod grid;
pub mod remote;
pub mod session;
pub mod sheets_api;

pub use remote::{
    ConnectedAccount, ConnectionBroker, ConnectionStatus, InitiateOutcome, SheetTab, SheetTarget,
    SheetsBackend,
};
pub use session::{SessionSnapshot, SheetSession};
