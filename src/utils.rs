use std::ffi::{c_char, CStr, CString};
use std::path::Path;

use crate::errors::*;

pub fn _string(raw_ptr: *const c_char) -> String {
    let c_str = unsafe { CStr::from_ptr(raw_ptr) };
    c_str.to_string_lossy().into_owned()
}

/// Like [`_string`], but maps a null pointer to `None`.
pub fn _opt_string(raw_ptr: *const c_char) -> Option<String> {
    if raw_ptr.is_null() {
        None
    } else {
        Some(_string(raw_ptr))
    }
}

/// Converts a null-terminated `char**` into owned strings.
pub fn _string_array(raw_ptr: *mut *mut c_char) -> Vec<String> {
    let mut ret_val: Vec<String> = vec![];
    if raw_ptr.is_null() {
        return ret_val;
    }
    let mut i = 0;
    unsafe {
        loop {
            let next = raw_ptr.add(i).read();
            if next.is_null() {
                break;
            }
            ret_val.push(_string(next));
            i += 1;
        }
    }
    ret_val
}

pub fn _path_to_c_string(path: &Path) -> Result<CString> {
    let path_str = path.to_string_lossy();
    CString::new(path_str.as_ref()).map_err(Into::into)
}

/// Reads a string allocated by GDAL and releases it with `VSIFree`.
pub fn _take_gdal_string(raw_ptr: *mut c_char) -> Option<String> {
    if raw_ptr.is_null() {
        return None;
    }
    let value = _string(raw_ptr);
    unsafe { gdal_sys::VSIFree(raw_ptr.cast()) };
    Some(value)
}
