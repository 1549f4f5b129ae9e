pub mod dispatcher;
pub mod planner;
pub mod sender;

pub use dispatcher::Dispatcher;
pub use planner::ReminderPlanner;
pub use sender::{InAppSender, SendError, Sender, SenderRegistry, WebhookSender};
