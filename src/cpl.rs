//! GDAL string lists.
//!
//! GDAL passes driver lists, open options and creation options around as a
//! null-terminated `char **`. [`CslStringList`] owns such a list and frees it
//! on drop.

use std::ffi::{c_char, CString};
use std::fmt::{Debug, Formatter};
use std::ptr;

use gdal_sys::{CSLAddString, CSLCount, CSLDestroy, CSLFetchNameValue, CSLSetNameValue};

use crate::errors::{OgrioError, Result};
use crate::utils::{_opt_string, _string_array};

pub struct CslStringList {
    list_ptr: *mut *mut c_char,
}

impl CslStringList {
    pub fn new() -> Self {
        Self {
            list_ptr: ptr::null_mut(),
        }
    }

    /// Builds a list of plain entries, e.g. driver names.
    pub fn from_strings<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for value in values {
            list.add_string(value.as_ref())?;
        }
        Ok(list)
    }

    /// Builds a `KEY=VALUE` list from `(key, value)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        let mut list = Self::new();
        for (name, value) in pairs {
            list.set_name_value(name, value)?;
        }
        Ok(list)
    }

    /// Appends an entry verbatim.
    pub fn add_string(&mut self, value: &str) -> Result<()> {
        let psz_value = CString::new(value)?;
        unsafe {
            self.list_ptr = CSLAddString(self.list_ptr, psz_value.as_ptr());
        }
        Ok(())
    }

    /// Assigns `value` to `name`, overwriting an existing entry.
    ///
    /// Fails with [`OgrioError::BadArgument`] if `name` is not a plain
    /// identifier or `value` spans several lines.
    pub fn set_name_value(&mut self, name: &str, value: &str) -> Result<()> {
        let valid_name = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if name.is_empty() || !valid_name {
            return Err(OgrioError::BadArgument(format!(
                "Invalid option name: '{name}'"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(OgrioError::BadArgument(format!(
                "Invalid option value for '{name}': '{value}'"
            )));
        }
        let psz_name = CString::new(name)?;
        let psz_value = CString::new(value)?;
        unsafe {
            self.list_ptr = CSLSetNameValue(self.list_ptr, psz_name.as_ptr(), psz_value.as_ptr());
        }
        Ok(())
    }

    pub fn fetch_name_value(&self, key: &str) -> Result<Option<String>> {
        let key = CString::new(key)?;
        let c_value = unsafe { CSLFetchNameValue(self.as_ptr(), key.as_ptr()) };
        Ok(_opt_string(c_value))
    }

    pub fn len(&self) -> usize {
        (unsafe { CSLCount(self.as_ptr()) }) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<String> {
        _string_array(self.list_ptr)
    }

    pub fn as_ptr(&self) -> gdal_sys::CSLConstList {
        self.list_ptr as gdal_sys::CSLConstList
    }
}

impl Drop for CslStringList {
    fn drop(&mut self) {
        unsafe { CSLDestroy(self.list_ptr) }
    }
}

impl Default for CslStringList {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CslStringList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}
