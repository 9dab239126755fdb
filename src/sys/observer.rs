//! An observer for accessibility notifications.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use objc2_application_services::{AXError, AXObserver, AXUIElement as RawAXUIElement};
use objc2_core_foundation::{CFRetained, CFRunLoop, CFRunLoopMode, CFString, kCFRunLoopDefaultMode};

use crate::sys::app::pid_t;
use crate::sys::axuielement::{AXUIElement, Error as AxError};

/// A registered accessibility observer for one process.
///
/// Notifications are delivered on the main run loop regardless of which
/// thread registered them; the observer itself only carries CF references,
/// which are safe to retain, release and unregister from any thread.
pub struct Observer {
    callback: *mut (),
    dtor: unsafe fn(*mut ()),
    observer: ManuallyDrop<CFRetained<AXObserver>>,
}

unsafe impl Send for Observer {}

/// Helper type for building an [`Observer`].
pub struct ObserverBuilder<F>(CFRetained<AXObserver>, PhantomData<F>);

impl Observer {
    /// Creates a new observer for an app, given its `pid`.
    ///
    /// [`ObserverBuilder::install`] must be called on the result for the
    /// observer to have any effect.
    pub fn new<F: Fn(AXUIElement, &str) + 'static>(
        pid: pid_t,
    ) -> Result<ObserverBuilder<F>, AxError> {
        let mut observer_ptr: *mut AXObserver = ptr::null_mut();
        let status = unsafe {
            AXObserver::create(
                pid,
                Some(internal_callback::<F>),
                NonNull::new(&mut observer_ptr as *mut *mut AXObserver).expect("nonnull pointer"),
            )
        };
        make_result(status)?;
        let observer = unsafe {
            CFRetained::from_raw(NonNull::new(observer_ptr).expect("observer must be non-null"))
        };
        Ok(ObserverBuilder(observer, PhantomData))
    }
}

impl<F: Fn(AXUIElement, &str) + 'static> ObserverBuilder<F> {
    /// Installs the observer with the supplied callback onto the main run
    /// loop in default mode.
    pub fn install(self, callback: F) -> Observer {
        let run_loop_source = unsafe { self.0.run_loop_source() };
        if let Some(run_loop) = CFRunLoop::main() {
            let mode: &CFRunLoopMode =
                unsafe { kCFRunLoopDefaultMode.expect("kCFRunLoopDefaultMode") };
            run_loop.add_source(Some(run_loop_source.as_ref()), Some(mode));
        }
        Observer {
            callback: Box::into_raw(Box::new(callback)) as *mut (),
            dtor: destruct::<F>,
            observer: ManuallyDrop::new(self.0),
        }
    }
}

unsafe fn destruct<T>(ptr: *mut ()) {
    let _ = unsafe { Box::from_raw(ptr as *mut T) };
}

impl Drop for Observer {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.observer);
            (self.dtor)(self.callback);
        }
    }
}

impl Observer {
    pub fn add_notification(
        &self,
        elem: &AXUIElement,
        notification: &'static str,
    ) -> Result<(), AxError> {
        let notification_cf = CFString::from_static_str(notification);
        let observer: &AXObserver = &self.observer;
        make_result(unsafe {
            observer.add_notification(
                elem.as_concrete_TypeRef(),
                notification_cf.as_ref(),
                self.callback as *mut c_void,
            )
        })
    }

    pub fn remove_notification(
        &self,
        elem: &AXUIElement,
        notification: &'static str,
    ) -> Result<(), AxError> {
        let notification_cf = CFString::from_static_str(notification);
        let observer: &AXObserver = &self.observer;
        make_result(unsafe {
            observer.remove_notification(elem.as_concrete_TypeRef(), notification_cf.as_ref())
        })
    }
}

unsafe extern "C-unwind" fn internal_callback<F: Fn(AXUIElement, &str) + 'static>(
    _observer: NonNull<AXObserver>,
    elem: NonNull<RawAXUIElement>,
    notif: NonNull<CFString>,
    data: *mut c_void,
) {
    let callback = unsafe { &*(data as *const F) };
    let elem = unsafe { AXUIElement::from_get_rule(elem.as_ptr()) };
    let notif = unsafe { CFRetained::retain(notif) };
    let notif = notif.to_string();
    callback(elem, &notif);
}

fn make_result(err: AXError) -> Result<(), AxError> {
    if err == AXError::Success {
        Ok(())
    } else {
        Err(AxError::Ax(err))
    }
}
