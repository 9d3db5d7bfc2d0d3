//! CLI command implementations.
//!
//! | Module   | Commands handled                |
//! |----------|---------------------------------|
//! | `run`    | `Run`                           |
//! | `status` | `Status`, `Validate`, `Reset`   |

pub mod run;
pub mod status;

pub use run::cmd_run;
pub use status::{cmd_reset, cmd_status, cmd_validate};
