//! A safe wrapper over the accessibility element API.
//!
//! Elements are opaque reference-counted tokens into another process's
//! accessibility tree. Equality and hashing go through the platform
//! predicate (`CFEqual`/`CFHash`), never pointer identity: the AX runtime
//! hands out distinct wrappers for the same underlying node.

use std::error::Error as StdError;
use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ptr::{self, NonNull};

use objc2_application_services::{AXError, AXUIElement as RawAXUIElement, AXValue, AXValueType};
use objc2_core_foundation::{
    CFArray, CFBoolean, CFData, CFRetained, CFString, CFType, CGPoint, CGRect, CGSize,
    ConcreteType,
};

use crate::sys::app::pid_t;
use crate::sys::skylight::_AXUIElementCreateWithRemoteToken;

pub const AX_WINDOW_ROLE: &str = "AXWindow";
pub const AX_STANDARD_WINDOW_SUBROLE: &str = "AXStandardWindow";
pub const AX_DIALOG_SUBROLE: &str = "AXDialog";

#[derive(Clone)]
pub struct AXUIElement {
    inner: CFRetained<RawAXUIElement>,
}

// SAFETY: AXUIElement is a CFType; retain/release, CFEqual and CFHash are
// thread-safe, and attribute reads are mach RPCs that may be issued from any
// thread. Mutable state lives in the remote process, not in this token.
unsafe impl Send for AXUIElement {}
unsafe impl Sync for AXUIElement {}

#[derive(Debug, Clone)]
pub enum Error {
    Ax(AXError),
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ax(err) => write!(f, "AX error {err:?}"),
            Error::NotFound => write!(f, "value not found"),
        }
    }
}

impl StdError for Error {}

impl From<AXError> for Error {
    fn from(value: AXError) -> Self {
        Self::Ax(value)
    }
}

impl Error {
    /// True when the underlying call reported that the remote element can no
    /// longer be reached. This is the signal that a cached handle is dead.
    pub fn is_cannot_complete(&self) -> bool {
        matches!(self, Error::Ax(code) if *code == AXError::CannotComplete)
    }
}

impl AXUIElement {
    fn new(inner: CFRetained<RawAXUIElement>) -> Self {
        Self { inner }
    }

    #[inline]
    pub fn application(pid: pid_t) -> Self {
        // SAFETY: The returned object follows the Create rule and therefore
        // owns +1 retain count.
        let inner = unsafe { RawAXUIElement::new_application(pid) };
        Self::new(inner)
    }

    #[inline]
    pub fn system_wide() -> Self {
        // SAFETY: Create rule, +1 retain count.
        let inner = unsafe { RawAXUIElement::new_system_wide() };
        Self::new(inner)
    }

    /// Constructs an element from a synthetic remote token. Used by the
    /// brute-force discovery fallback; the element id space is undocumented
    /// but low ids map to windows in practice.
    pub fn from_remote_token(pid: pid_t, element_id: u64) -> Option<Self> {
        const BUFSIZE: usize = 0x14;
        const MAGIC: u32 = 0x636f636f;

        let mut data = [0u8; BUFSIZE];
        data[0x0..0x4].copy_from_slice(&(pid as u32).to_ne_bytes());
        data[0x8..0xc].copy_from_slice(&MAGIC.to_ne_bytes());
        data[0xc..0x14].copy_from_slice(&element_id.to_ne_bytes());

        let data = CFData::from_bytes(&data);
        let inner = unsafe {
            _AXUIElementCreateWithRemoteToken(CFRetained::<CFData>::as_ptr(&data).as_ptr())
        };
        let inner = NonNull::new(inner)?;
        // SAFETY: Create rule, +1 retain count.
        Some(Self::new(unsafe { CFRetained::from_raw(inner) }))
    }

    #[allow(non_snake_case)]
    #[inline]
    pub fn as_concrete_TypeRef(&self) -> &RawAXUIElement {
        self.deref()
    }

    #[inline]
    pub fn raw_ptr(&self) -> NonNull<RawAXUIElement> {
        CFRetained::as_ptr(&self.inner)
    }

    #[inline]
    pub unsafe fn from_get_rule(ptr: *const RawAXUIElement) -> Self {
        let ptr = NonNull::new(ptr.cast_mut()).expect("attempted to create a NULL object");
        let retained = unsafe { CFRetained::retain(ptr) };
        Self::new(retained)
    }

    fn copy_attribute(&self, name: &'static str) -> Result<Option<CFRetained<CFType>>> {
        let attr = CFString::from_static_str(name);
        let mut value: *const CFType = ptr::null();
        let status = unsafe {
            self.inner.copy_attribute_value(
                attr.as_ref(),
                NonNull::new((&mut value) as *mut *const CFType)
                    .expect("pointer to local is never null"),
            )
        };
        match status {
            AXError::Success => {
                if value.is_null() {
                    Ok(None)
                } else {
                    // SAFETY: Copy rule, the caller owns the value.
                    let retained = unsafe {
                        CFRetained::from_raw(
                            NonNull::new(value as *mut CFType).expect("non-null value pointer"),
                        )
                    };
                    Ok(Some(retained))
                }
            }
            AXError::NoValue | AXError::AttributeUnsupported => Ok(None),
            err => Err(Error::Ax(err)),
        }
    }

    fn copy_required_attribute(&self, name: &'static str) -> Result<CFRetained<CFType>> {
        self.copy_attribute(name)?.ok_or(Error::NotFound)
    }

    fn downcast<T: ConcreteType>(&self, value: CFRetained<CFType>) -> Result<CFRetained<T>> {
        value.downcast::<T>().map_err(|_| Error::Ax(AXError::Failure))
    }

    fn string_attribute(&self, name: &'static str) -> Result<String> {
        let value = self.copy_required_attribute(name)?;
        let string = self.downcast::<CFString>(value)?;
        Ok(string.to_string())
    }

    fn bool_attribute(&self, name: &'static str) -> Result<bool> {
        let value = self.copy_required_attribute(name)?;
        let boolean = self.downcast::<CFBoolean>(value)?;
        Ok(boolean.value())
    }

    fn element_attribute(&self, name: &'static str) -> Result<Option<AXUIElement>> {
        let Some(value) = self.copy_attribute(name)? else {
            return Ok(None);
        };
        let element = self.downcast::<RawAXUIElement>(value)?;
        Ok(Some(AXUIElement::new(element)))
    }

    pub fn role(&self) -> Result<String> {
        self.string_attribute("AXRole")
    }

    pub fn subrole(&self) -> Result<Option<String>> {
        match self.string_attribute("AXSubrole") {
            Ok(subrole) => Ok(Some(subrole)),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn title(&self) -> Result<String> {
        self.string_attribute("AXTitle")
    }

    pub fn minimized(&self) -> Result<bool> {
        self.bool_attribute("AXMinimized")
    }

    pub fn fullscreen(&self) -> Result<bool> {
        self.bool_attribute("AXFullScreen")
    }

    pub fn frame(&self) -> Result<CGRect> {
        let value = self.copy_required_attribute("AXFrame")?;
        let ax_value = self.downcast::<AXValue>(value)?;
        rect_from_axvalue(&ax_value)
    }

    pub fn position(&self) -> Result<CGPoint> {
        let value = self.copy_required_attribute("AXPosition")?;
        let ax_value = self.downcast::<AXValue>(value)?;
        let mut point = CGPoint::default();
        read_axvalue(&ax_value, AXValueType::CGPoint, &mut point)?;
        Ok(point)
    }

    pub fn size(&self) -> Result<CGSize> {
        let value = self.copy_required_attribute("AXSize")?;
        let ax_value = self.downcast::<AXValue>(value)?;
        let mut size = CGSize::default();
        read_axvalue(&ax_value, AXValueType::CGSize, &mut size)?;
        Ok(size)
    }

    pub fn main_window(&self) -> Result<AXUIElement> {
        self.element_attribute("AXMainWindow")?.ok_or(Error::NotFound)
    }

    pub fn close_button(&self) -> Result<Option<AXUIElement>> {
        self.element_attribute("AXCloseButton")
    }

    pub fn minimize_button(&self) -> Result<Option<AXUIElement>> {
        self.element_attribute("AXMinimizeButton")
    }

    pub fn windows(&self) -> Result<Vec<AXUIElement>> {
        let Some(value) = self.copy_attribute("AXWindows")? else {
            return Ok(Vec::new());
        };
        let array = self.downcast::<CFArray>(value)?;
        let array = unsafe { CFRetained::cast_unchecked::<CFArray<CFType>>(array) };
        let mut out = Vec::with_capacity(array.len());
        for entry in array.iter() {
            let elem = self.downcast::<RawAXUIElement>(entry)?;
            out.push(AXUIElement::new(elem));
        }
        Ok(out)
    }

    pub fn set_bool_attribute(&self, name: &'static str, value: bool) -> Result<()> {
        let cf_bool = CFBoolean::new(value);
        let attr = CFString::from_static_str(name);
        let status = unsafe { self.inner.set_attribute_value(attr.as_ref(), cf_bool.as_ref()) };
        if status == AXError::Success {
            Ok(())
        } else {
            Err(Error::Ax(status))
        }
    }

    /// Performs an action (e.g. `AXPress` on a close button) on behalf of a
    /// manipulation request. Failures surface to the caller and never touch
    /// the cache.
    pub fn perform_action(&self, name: &'static str) -> Result<()> {
        let action = CFString::from_static_str(name);
        let status = unsafe { self.inner.perform_action(action.as_ref()) };
        if status == AXError::Success {
            Ok(())
        } else {
            Err(Error::Ax(status))
        }
    }
}

impl Deref for AXUIElement {
    type Target = RawAXUIElement;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl PartialEq for AXUIElement {
    fn eq(&self, other: &Self) -> bool {
        let this: &CFType = &self.inner;
        let that: &CFType = &other.inner;
        this == that
    }
}

impl Eq for AXUIElement {}

impl Hash for AXUIElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let this: &CFType = &self.inner;
        this.hash(state);
    }
}

impl fmt::Debug for AXUIElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

fn rect_from_axvalue(value: &AXValue) -> Result<CGRect> {
    let mut rect = CGRect::default();
    read_axvalue(value, AXValueType::CGRect, &mut rect)?;
    Ok(rect)
}

fn read_axvalue<T>(value: &AXValue, ty: AXValueType, out: &mut T) -> Result<()> {
    let success = unsafe {
        value.value(
            ty,
            NonNull::new((out as *mut T).cast::<c_void>()).expect("out pointer"),
        )
    };
    if success {
        Ok(())
    } else {
        Err(Error::Ax(AXError::Failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_value_based_not_wrapper_based() {
        let a = AXUIElement::application(1);
        let b = AXUIElement::application(1);
        let c = AXUIElement::application(2);
        // Two independently created tokens for the same application compare
        // equal through CFEqual even though the wrappers are distinct.
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_agrees_with_equality() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(AXUIElement::application(7));
        assert!(set.contains(&AXUIElement::application(7)));
        assert!(!set.contains(&AXUIElement::application(8)));
    }
}
