//! Controller side: task dispatch and data preparation across workers

pub mod dispatcher;
pub mod flow;
pub mod transport;

pub use dispatcher::{DataModelViewArgs, RequestScope, TaskDispatcher};
pub use flow::{Controller, DataRequest, LocalView, PreparedData};
pub use transport::{HttpTransport, LocalTransport, WorkerTransport};
