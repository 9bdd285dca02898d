use std::process::ExitCode;

pub const SUCCESS: u8 = 0;
pub const ISSUES_FOUND: u8 = 1;
pub const INTERNAL_ERROR: u8 = 2;

pub fn success() -> ExitCode {
    ExitCode::from(SUCCESS)
}

pub fn issues_found(found: bool) -> ExitCode {
    if found {
        ExitCode::from(ISSUES_FOUND)
    } else {
        success()
    }
}

pub fn internal_error() -> ExitCode {
    ExitCode::from(INTERNAL_ERROR)
}
