//! CLI command implementations.
//!
//! | Module      | Commands handled        |
//! |-------------|-------------------------|
//! | `serve`     | `Serve`, `InitDb`       |
//! | `token`     | `SignToken`             |
//! | `postback`  | `Postback`              |

pub mod postback;
pub mod serve;
pub mod token;

pub use postback::cmd_postback;
pub use serve::{cmd_init_db, cmd_serve};
pub use token::cmd_sign_token;
