pub mod controller;
pub mod loop_worker;
pub mod probe;
pub mod session;

pub use controller::MonitorController;
pub use loop_worker::{monitor_loop, MonitorContext, MonitorExit};
pub use probe::ForegroundProbe;
pub use session::{is_own_app, MonitorSession, TickAction};
