pub mod command_stream;
pub mod echo;
pub mod error;
pub mod file_stream;
pub mod instruction;
pub mod limiter;
pub mod port_forward;
pub mod remote_process;
pub mod terminal;

pub use command_stream::CommandStream;
pub use echo::Echo;
pub use error::Error;
pub use file_stream::FileStream;
pub use instruction::Instruction;
pub use limiter::{Grant, Limiter};
pub use port_forward::{PortForwardConnection, PortForwardManager, PortForwardTarget};
pub use remote_process::RemoteProcess;
pub use terminal::{TerminalDefinition, TerminalRegistry};
