//! Scoped capture of GDAL diagnostics.
//!
//! GDAL reports problems through `CPLError`, which invokes whatever handler is
//! on top of the calling thread's handler stack. [`with_error_capture`] pushes
//! a handler for the duration of one operation and collects every diagnostic
//! into an ordered list of [`ErrorRecord`]s:
//!
//! ```rust, no_run
//! use ogrio::capture::with_error_capture;
//!
//! let captured = with_error_capture(|| 40 + 2);
//! assert_eq!(captured.value, 42);
//! assert!(captured.diagnostics.is_empty());
//! ```
//!
//! The handler is popped when the capture guard is dropped, so it is torn down
//! on every exit path, including panics inside the operation.

use std::cell::RefCell;
use std::ffi::{c_char, c_void};
use std::marker::PhantomData;

use gdal_sys::{CPLErr, CPLErrorNum};
use log::{debug, warn};

use crate::errors::{ErrorRecord, OgrioError, Result, Severity};
use crate::utils::_string;

/// Diagnostics collected while a capture was active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    records: Vec<ErrorRecord>,
}

impl Diagnostics {
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|r| r.is_warning())
    }

    pub fn into_warnings(self) -> Vec<ErrorRecord> {
        self.records.into_iter().filter(|r| r.is_warning()).collect()
    }

    /// The last record of severity `Error` or worse.
    ///
    /// GDAL tends to emit a generic message last only after a more specific
    /// one, so the last record is the one describing the final failure.
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.records.iter().rev().find(|r| !r.is_warning())
    }

    pub fn fatal(&self) -> Option<&ErrorRecord> {
        self.records
            .iter()
            .find(|r| r.severity == Severity::Fatal)
    }

    /// Applies the severity policy: fatal records become
    /// [`OgrioError::NativeFatalError`], error records become
    /// [`OgrioError::NativeError`] and warnings pass through.
    pub fn check(&self, method_name: &'static str) -> Result<()> {
        if let Some(fatal) = self.fatal() {
            return Err(OgrioError::NativeFatalError(fatal.clone()));
        }
        match self.last_error() {
            Some(record) => Err(OgrioError::NativeError {
                method_name,
                record: record.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Like [`check`](Self::check), but also rejects warnings with
    /// [`OgrioError::NativeWarning`].
    pub fn into_strict(self, method_name: &'static str) -> Result<()> {
        self.check(method_name)?;
        match self.records.into_iter().next() {
            Some(warning) => Err(OgrioError::NativeWarning(warning)),
            None => Ok(()),
        }
    }
}

/// The result of an operation run under [`with_error_capture`].
#[derive(Debug)]
pub struct Captured<T> {
    pub value: T,
    pub diagnostics: Diagnostics,
}

type RecordBuffer = RefCell<Vec<ErrorRecord>>;

/// An active capture context. Dropping it pops the handler.
pub struct ErrorCapture {
    // Boxed so the address handed to GDAL stays put while the guard moves.
    records: Box<RecordBuffer>,
    // The handler stack is per thread.
    _not_send: PhantomData<*mut c_void>,
}

impl ErrorCapture {
    pub fn begin() -> Self {
        let records: Box<RecordBuffer> = Box::default();
        let user_data = &*records as *const RecordBuffer as *mut c_void;
        unsafe {
            gdal_sys::CPLErrorReset();
            gdal_sys::CPLPushErrorHandlerEx(Some(capture_handler), user_data);
        }
        ErrorCapture {
            records,
            _not_send: PhantomData,
        }
    }

    /// Ends the capture and returns what it collected.
    pub fn finish(self) -> Diagnostics {
        let records = self.records.replace(Vec::new());
        // `self` drops here and pops the handler.
        Diagnostics { records }
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe { gdal_sys::CPLPopErrorHandler() };
    }
}

unsafe extern "C" fn capture_handler(
    class: CPLErr::Type,
    number: CPLErrorNum,
    message: *const c_char,
) {
    let message = if message.is_null() {
        String::new()
    } else {
        _string(message)
    };
    let Some(severity) = Severity::from_cpl(class) else {
        debug!("GDAL: {message}");
        return;
    };
    let buffer = gdal_sys::CPLGetErrorHandlerUserData() as *const RecordBuffer;
    if buffer.is_null() {
        return;
    }
    // A handler must not unwind into C; a re-entrant borrow drops the record.
    if let Ok(mut records) = (*buffer).try_borrow_mut() {
        records.push(ErrorRecord::new(severity, number, message));
    }
}

/// Runs `operation` with a fresh capture context.
pub fn with_error_capture<T, F>(operation: F) -> Captured<T>
where
    F: FnOnce() -> T,
{
    let capture = ErrorCapture::begin();
    let value = operation();
    Captured {
        value,
        diagnostics: capture.finish(),
    }
}

/// Logs the warnings of a finished capture.
pub(crate) fn log_warnings(context: &str, diagnostics: &Diagnostics) {
    for record in diagnostics.warnings() {
        warn!("{context}: {record}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn raise(class: CPLErr::Type, code: i32, msg: &str) {
        let fmt = CString::new("%s").unwrap();
        let msg = CString::new(msg).unwrap();
        unsafe { gdal_sys::CPLError(class, code, fmt.as_ptr(), msg.as_ptr()) };
    }

    #[test]
    fn collects_records_in_order() {
        let captured = with_error_capture(|| {
            raise(CPLErr::CE_Warning, 1, "first");
            raise(CPLErr::CE_Failure, 42, "second");
            7
        });
        assert_eq!(captured.value, 7);
        assert_eq!(
            captured.diagnostics.records(),
            &[
                ErrorRecord::new(Severity::Warning, 1, "first"),
                ErrorRecord::new(Severity::Error, 42, "second"),
            ]
        );
    }

    #[test]
    fn warnings_do_not_fail_check() {
        let captured = with_error_capture(|| raise(CPLErr::CE_Warning, 6, "just saying"));
        assert!(captured.diagnostics.check("test").is_ok());
        assert_eq!(captured.diagnostics.warnings().count(), 1);
        assert!(matches!(
            captured.diagnostics.into_strict("test"),
            Err(OgrioError::NativeWarning(r)) if r.code == 6
        ));
    }

    #[test]
    fn errors_fail_check_with_native_code() {
        let captured = with_error_capture(|| raise(CPLErr::CE_Failure, 10, "broken"));
        match captured.diagnostics.check("OGR_Something") {
            Err(OgrioError::NativeError {
                method_name,
                record,
            }) => {
                assert_eq!(method_name, "OGR_Something");
                assert_eq!(record.code, 10);
                assert_eq!(record.message, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_captures_are_isolated() {
        let outer = with_error_capture(|| {
            raise(CPLErr::CE_Warning, 1, "outer");
            let inner = with_error_capture(|| raise(CPLErr::CE_Warning, 2, "inner"));
            assert_eq!(inner.diagnostics.records().len(), 1);
            assert_eq!(inner.diagnostics.records()[0].code, 2);
        });
        assert_eq!(outer.diagnostics.records().len(), 1);
        assert_eq!(outer.diagnostics.records()[0].code, 1);
    }

    #[test]
    fn handler_is_popped_after_panic() {
        let result = std::panic::catch_unwind(|| {
            with_error_capture(|| panic!("boom"));
        });
        assert!(result.is_err());
        // A fresh capture still sees its own diagnostics only.
        let captured = with_error_capture(|| raise(CPLErr::CE_Warning, 3, "after"));
        assert_eq!(captured.diagnostics.records().len(), 1);
    }
}
