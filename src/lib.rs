//! Operation-based editing and sync for Google Sheets.
//!
//! Edits from the user and from a hosted agent are expressed as
//! [`EditOperation`]s, queued against a pulled base in a [`SheetSession`],
//! previewed and validated locally, then pushed back as a full grid.

pub mod address;
pub mod agent;
pub mod apply;
pub mod config;
pub mod diff;
pub mod errors;
pub mod logging;
pub mod model;
pub mod ops;
pub mod sync;
pub mod validate;

pub use agent::{AgentEvent, AgentSession, AgentTransport, SheetContext, TurnOutcome};
pub use apply::apply_ops;
pub use config::{AuthMode, ConfigArgs, SheetOpsConfig};
pub use diff::{SheetDiff, diff_states};
pub use errors::{AgentError, RemoteError, SyncAction, SyncError};
pub use model::{Align, Column, ColumnType, Row, SheetState, ValidationIssue};
pub use ops::{Author, EditOperation, OpIdBatch, SortDirection};
pub use sync::{SessionSnapshot, SheetSession, SheetTarget, SheetsBackend};
pub use validate::validate_rows;
