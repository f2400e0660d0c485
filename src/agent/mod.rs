//! Chat with the hosted sheet-editing agent.

pub mod parser;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

pub use parser::{parse_agent_response, parse_agent_response_with};
pub use protocol::{SheetContext, is_connection_confirmed, operations_schema};
pub use session::{
    AgentEvent, AgentSession, AgentStatus, CONNECT_TIMEOUT, ChatMessage, ConnectedSheet,
    ConnectionState, MessageRole, TurnOutcome,
};
pub use stream::{AUTH_REQUIRED, ChunkStream, StreamOutcome};
pub use transport::{AgentRequest, AgentResponse, AgentTransport, HttpAgentTransport};
