pub mod analyze;

use crate::rules::Result;
use crate::utils::writer::Writer;

pub const APP_NAME: &str = "arm-guard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

//
// Exit code conventions
//
pub const SUCCESS_STATUS_CODE: i32 = 0;
pub const ERROR_STATUS_CODE: i32 = 5;
pub const FAILURE_STATUS_CODE: i32 = 19;

pub trait Executable {
    fn execute(&self, writer: &mut Writer) -> Result<i32>;
}
