use std::ffi::NulError;
use std::fmt::{Display, Formatter};
use std::str::Utf8Error;

use gdal_sys::{CPLErr, OGRErr};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OgrioError>;

/// Severity of a diagnostic raised by GDAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Maps a CPL error class onto a severity. `CE_None` and `CE_Debug` are not
    /// diagnostics and map to `None`.
    pub fn from_cpl(class: CPLErr::Type) -> Option<Severity> {
        match class {
            CPLErr::CE_Warning => Some(Severity::Warning),
            CPLErr::CE_Failure => Some(Severity::Error),
            CPLErr::CE_Fatal => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One diagnostic raised by GDAL during a captured call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub severity: Severity,
    /// The native `CPLErrorNum`.
    pub code: i32,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(severity: Severity, code: i32, message: impl Into<String>) -> Self {
        ErrorRecord {
            severity,
            code,
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}

fn native_suffix(record: &Option<ErrorRecord>) -> String {
    match record {
        Some(r) => format!(" ({r})"),
        None => String::new(),
    }
}

#[derive(Clone, Debug, Error)]
pub enum OgrioError {
    #[error("FfiNulError")]
    FfiNulError(#[from] NulError),
    #[error("StrUtf8Error")]
    StrUtf8Error(#[from] Utf8Error),
    #[error("Driver '{name}' is not registered")]
    DriverNotFound { name: String },
    #[error("Unable to open '{path}'{}", native_suffix(.native))]
    DataSourceOpenError {
        path: String,
        native: Option<ErrorRecord>,
    },
    #[error("Layer '{layer}' not found")]
    LayerNotFound { layer: String },
    #[error("Feature does not match layer '{layer}': {msg}")]
    SchemaMismatch { layer: String, msg: String },
    #[error("Unsupported operation '{operation}': {reason}")]
    UnsupportedOperation {
        operation: &'static str,
        reason: String,
    },
    #[error("Geometry conversion failed: {msg}{}", native_suffix(.native))]
    GeometryConversionError {
        msg: String,
        native: Option<ErrorRecord>,
    },
    #[error("CRS transform failed: {msg}{}", native_suffix(.native))]
    CrsTransformError {
        msg: String,
        native: Option<ErrorRecord>,
    },
    #[error("GDAL warning: {0}")]
    NativeWarning(ErrorRecord),
    #[error("GDAL fatal error: {0}")]
    NativeFatalError(ErrorRecord),
    #[error("GDAL method '{method_name}' failed: {record}")]
    NativeError {
        method_name: &'static str,
        record: ErrorRecord,
    },
    #[error("Feature {fid} not found in layer '{layer}'")]
    FeatureNotFound { layer: String, fid: u64 },
    #[error("Invalid field name '{field_name}'")]
    InvalidFieldName { field_name: String },
    #[error("Bad argument: {0}")]
    BadArgument(String),
}

impl OgrioError {
    pub(crate) fn closed(operation: &'static str) -> Self {
        OgrioError::UnsupportedOperation {
            operation,
            reason: "data source is closed".to_string(),
        }
    }

    pub(crate) fn unsupported(operation: &'static str, reason: impl Into<String>) -> Self {
        OgrioError::UnsupportedOperation {
            operation,
            reason: reason.into(),
        }
    }

    /// Builds the error for a failed native call that returned an `OGRErr`
    /// without raising a CPL error of its own.
    pub(crate) fn from_ogr_err(err: OGRErr::Type, method_name: &'static str) -> Self {
        OgrioError::NativeError {
            method_name,
            record: ErrorRecord::new(Severity::Error, err as i32, ogr_err_message(err)),
        }
    }

    /// The native diagnostic carried by this error, if any.
    pub fn native_record(&self) -> Option<&ErrorRecord> {
        match self {
            OgrioError::DataSourceOpenError { native, .. }
            | OgrioError::GeometryConversionError { native, .. }
            | OgrioError::CrsTransformError { native, .. } => native.as_ref(),
            OgrioError::NativeWarning(record)
            | OgrioError::NativeFatalError(record)
            | OgrioError::NativeError { record, .. } => Some(record),
            _ => None,
        }
    }
}

fn ogr_err_message(err: OGRErr::Type) -> &'static str {
    match err {
        OGRErr::OGRERR_NOT_ENOUGH_DATA => "not enough data",
        OGRErr::OGRERR_NOT_ENOUGH_MEMORY => "not enough memory",
        OGRErr::OGRERR_UNSUPPORTED_GEOMETRY_TYPE => "unsupported geometry type",
        OGRErr::OGRERR_UNSUPPORTED_OPERATION => "unsupported operation",
        OGRErr::OGRERR_CORRUPT_DATA => "corrupt data",
        OGRErr::OGRERR_UNSUPPORTED_SRS => "unsupported SRS",
        OGRErr::INVALID_HANDLE => "invalid handle",
        OGRErr::NON_EXISTING_FEATURE => "non existing feature",
        _ => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_from_cpl_class() {
        assert_eq!(Severity::from_cpl(CPLErr::CE_None), None);
        assert_eq!(Severity::from_cpl(CPLErr::CE_Debug), None);
        assert_eq!(
            Severity::from_cpl(CPLErr::CE_Warning),
            Some(Severity::Warning)
        );
        assert_eq!(Severity::from_cpl(CPLErr::CE_Failure), Some(Severity::Error));
        assert_eq!(Severity::from_cpl(CPLErr::CE_Fatal), Some(Severity::Fatal));
    }

    #[test]
    fn open_error_keeps_native_record() {
        let err = OgrioError::DataSourceOpenError {
            path: "nowhere.shp".to_string(),
            native: Some(ErrorRecord::new(Severity::Error, 4, "No such file")),
        };
        assert_eq!(err.native_record().map(|r| r.code), Some(4));
        assert_eq!(
            err.to_string(),
            "Unable to open 'nowhere.shp' (error 4: No such file)"
        );
    }

    #[test]
    fn ogr_err_is_wrapped() {
        let err = OgrioError::from_ogr_err(
            OGRErr::OGRERR_UNSUPPORTED_OPERATION,
            "OGR_L_CreateFeature",
        );
        let record = err.native_record().unwrap();
        assert_eq!(record.message, "unsupported operation");
        assert_eq!(record.severity, Severity::Error);
    }
}
