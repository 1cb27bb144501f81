//! Domain model (ids, tasks, users, errors).

pub mod errors;
pub mod ids;
pub mod task;
pub mod user;

pub use self::errors::{StoreError, StoreResult, TaskError, UserError};
pub use self::ids::{Id, IdMarker, ParseIdError, TaskId, UserId};
pub use self::task::{Task, TaskAttributes, TaskStatus};
pub use self::user::{User, UserLoginRequest, UserRequest};
