//! GDAL configuration.
//!
//! GDAL reads configuration options from the environment and from values set
//! at runtime through this module; runtime values take precedence.
//!
//! ```rust, no_run
//! use ogrio::config::*;
//!
//! set_config_option("OGR_GEOJSON_MAX_OBJ_SIZE", "0").unwrap();
//! assert_eq!(get_config_option("OGR_GEOJSON_MAX_OBJ_SIZE", "").unwrap(), "0");
//! clear_config_option("OGR_GEOJSON_MAX_OBJ_SIZE").unwrap();
//! ```
//!
//! [`Env`] scopes a set of options to a block of code, and [`RuntimeData`]
//! locates the support files GDAL and PROJ need at runtime.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::capture::with_error_capture;
use crate::cpl::CslStringList;
use crate::errors::{ErrorRecord, Result, Severity};
use crate::utils::_opt_string;

/// Set a GDAL library configuration option.
pub fn set_config_option(key: &str, value: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    let c_val = CString::new(value.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetConfigOption(c_key.as_ptr(), c_val.as_ptr());
    };
    Ok(())
}

/// Get the value of a GDAL library configuration option, or `default` if it
/// is not set.
pub fn get_config_option(key: &str, default: &str) -> Result<String> {
    let c_key = CString::new(key.as_bytes())?;
    let c_default = CString::new(default.as_bytes())?;
    let rv = unsafe { gdal_sys::CPLGetConfigOption(c_key.as_ptr(), c_default.as_ptr()) };
    Ok(_opt_string(rv).unwrap_or_default())
}

/// Clear the value of a GDAL library configuration option.
pub fn clear_config_option(key: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetConfigOption(c_key.as_ptr(), ::std::ptr::null());
    };
    Ok(())
}

/// Set a GDAL library configuration option with **thread local** scope.
pub fn set_thread_local_config_option(key: &str, value: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    let c_val = CString::new(value.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetThreadLocalConfigOption(c_key.as_ptr(), c_val.as_ptr());
    };
    Ok(())
}

fn thread_local_config_option(key: &str) -> Result<Option<String>> {
    let c_key = CString::new(key.as_bytes())?;
    let rv = unsafe { gdal_sys::CPLGetThreadLocalConfigOption(c_key.as_ptr(), ::std::ptr::null()) };
    Ok(_opt_string(rv))
}

/// Get the value of a **thread local** configuration option, or `default`.
pub fn get_thread_local_config_option(key: &str, default: &str) -> Result<String> {
    Ok(thread_local_config_option(key)?.unwrap_or_else(|| default.to_string()))
}

/// Clear a **thread local** configuration option.
pub fn clear_thread_local_config_option(key: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetThreadLocalConfigOption(c_key.as_ptr(), ::std::ptr::null());
    };
    Ok(())
}

/// Thread local configuration options that are undone on drop.
///
/// ```rust, no_run
/// use ogrio::config::{get_config_option, Env};
///
/// {
///     let _env = Env::new(&[("CPL_DEBUG", "ON")]).unwrap();
///     assert_eq!(get_config_option("CPL_DEBUG", "OFF").unwrap(), "ON");
/// }
/// assert_eq!(get_config_option("CPL_DEBUG", "OFF").unwrap(), "OFF");
/// ```
///
/// Values previously set on the same thread are restored, so environments
/// nest.
#[derive(Debug)]
pub struct Env {
    previous: Vec<(String, Option<String>)>,
    // Thread local options belong to the thread that set them.
    _not_send: std::marker::PhantomData<*mut ()>,
}

impl Env {
    pub fn new(options: &[(&str, &str)]) -> Result<Env> {
        let mut env = Env {
            previous: Vec::with_capacity(options.len()),
            _not_send: std::marker::PhantomData,
        };
        for (key, value) in options {
            let prior = thread_local_config_option(key)?;
            set_thread_local_config_option(key, value)?;
            env.previous.push((key.to_string(), prior));
        }
        Ok(env)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.previous.iter().map(|(k, _)| k.as_str())
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        for (key, prior) in self.previous.drain(..).rev() {
            // Keys were valid C strings when they were set.
            let restored = match prior {
                Some(value) => set_thread_local_config_option(&key, &value),
                None => clear_thread_local_config_option(&key),
            };
            if let Err(e) = restored {
                warn!("failed to restore config option {key}: {e}");
            }
        }
    }
}

/// Locations of the support files used by GDAL (`GDAL_DATA`) and by PROJ
/// (`PROJ_DATA`, formerly `PROJ_LIB`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeData {
    pub gdal_data: Option<PathBuf>,
    pub proj_data: Option<PathBuf>,
}

impl RuntimeData {
    /// Reads the locations from the process environment.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        RuntimeData {
            gdal_data: var("GDAL_DATA"),
            proj_data: var("PROJ_DATA").or_else(|| var("PROJ_LIB")),
        }
    }

    /// Hands the configured directories to GDAL and PROJ.
    ///
    /// Unset locations keep the compiled-in defaults. A location that is not
    /// an existing directory is skipped and reported as a warning; CRS
    /// operations and some drivers will then run with reduced support.
    pub fn apply(&self) -> Result<Vec<ErrorRecord>> {
        let mut warnings = Vec::new();

        if let Some(dir) = &self.gdal_data {
            if usable_dir(dir, "GDAL_DATA", &mut warnings) {
                set_config_option("GDAL_DATA", &dir.to_string_lossy())?;
                debug!("GDAL_DATA set to {}", dir.display());
            }
        }

        if let Some(dir) = &self.proj_data {
            if usable_dir(dir, "PROJ_DATA", &mut warnings) {
                let paths = CslStringList::from_strings([dir.to_string_lossy()])?;
                let captured = with_error_capture(|| unsafe {
                    gdal_sys::OSRSetPROJSearchPaths(paths.as_ptr() as _)
                });
                warnings.extend(captured.diagnostics.records().iter().cloned());
                debug!("PROJ search path set to {}", dir.display());
            }
        }

        Ok(warnings)
    }
}

fn usable_dir(dir: &Path, name: &str, warnings: &mut Vec<ErrorRecord>) -> bool {
    if dir.is_dir() {
        return true;
    }
    let record = ErrorRecord::new(
        Severity::Warning,
        0,
        format!("{name} directory {} does not exist", dir.display()),
    );
    warn!("{record}");
    warnings.push(record);
    false
}
