pub mod api;
pub mod events;
pub mod forms;
pub mod models;

pub use events::LiveEvent;
pub use models::{Notification, NotificationId, Reader, Role};
