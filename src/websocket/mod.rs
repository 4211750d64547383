mod handler;
mod session;

pub use handler::{is_valid_room_id, ws_handler, ws_missing_room_handler};
pub use session::{to_frame, to_message, ConnectionSession};
