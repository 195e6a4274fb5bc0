//! CLI command implementations.
//!
//! | Module   | Commands handled                      |
//! |----------|---------------------------------------|
//! | `serve`  | `Serve`                               |
//! | `users`  | `InitDb`, `CreateUser`, `Invite`      |

pub mod serve;
pub mod users;

pub use serve::cmd_serve;
pub use users::{cmd_create_user, cmd_init_db, cmd_invite};
