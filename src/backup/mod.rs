pub mod backup_config;
pub mod exclusion;
pub mod job;
pub mod pointer;
pub mod result_error;
pub mod script;
pub mod snapshot;
pub mod sync;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
