//! Outbound event model for input processing.
//!
//! Everything a device pipeline produces is expressed in the types of this
//! module: either pushed into an [`InputSink`] implemented by the consumer,
//! or, for queue-style consumers such as the calloop integration, as
//! [`InputEvent`] values.

use bitflags::bitflags;

/// Identifier of a device within its [`EvdevContext`](crate::backend::evdev::EvdevContext).
///
/// Ids are not reused while the device is attached, but may be recycled for
/// later devices once the device has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

bitflags! {
    /// Set of input types a device provides to its seat.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCapability: u32 {
        /// The device moves a pointer, relatively or absolutely, and has buttons.
        const POINTER = 1 << 0;
        /// The device has keyboard-class keys or LEDs.
        const KEYBOARD = 1 << 1;
        /// The device is a touch surface without buttons.
        const TOUCH = 1 << 2;
    }
}

bitflags! {
    /// Keyboard LEDs exposed to consumers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Led: u32 {
        /// Num lock
        const NUMLOCK = 1 << 0;
        /// Caps lock
        const CAPSLOCK = 1 << 1;
        /// Scroll lock
        const SCROLLLOCK = 1 << 2;
    }
}

/// State of a key on a keyboard. Either pressed or released
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum KeyState {
    /// Key is released
    Released,
    /// Key is pressed
    Pressed,
}

/// State of a button on a pointer device. Either pressed or released
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ButtonState {
    /// Button is released
    Released,
    /// Button is pressed
    Pressed,
}

/// Axis when scrolling
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Axis {
    /// Vertical axis
    Vertical,
    /// Horizontal axis
    Horizontal,
}

/// Receiver of the normalized event stream of a seat.
///
/// One sink serves all devices of a seat; the device a notification
/// originates from is passed along with every call. All methods default to
/// doing nothing, so consumers only implement what they care about.
///
/// Sinks must accept re-entrant calls: a single incoming `SYN_REPORT` can
/// produce several notifications (e.g. a touch event followed by its touch
/// frame) before control returns to the event loop.
///
/// Timestamps are milliseconds on the monotonic clock.
pub trait InputSink {
    /// A relative pointer motion, after acceleration.
    fn pointer_motion(&mut self, device: DeviceId, time: u64, dx: f64, dy: f64) {
        let _ = (device, time, dx, dy);
    }

    /// An absolute pointer motion in calibrated device coordinates.
    fn pointer_motion_absolute(&mut self, device: DeviceId, time: u64, x: f64, y: f64) {
        let _ = (device, time, x, y);
    }

    /// A pointer button changed state. `button` is a kernel `BTN_*` code.
    fn pointer_button(&mut self, device: DeviceId, time: u64, button: u32, state: ButtonState) {
        let _ = (device, time, button, state);
    }

    /// A scroll motion on the given axis.
    fn pointer_axis(&mut self, device: DeviceId, time: u64, axis: Axis, amount: f64) {
        let _ = (device, time, axis, amount);
    }

    /// A keyboard key changed state. `key` is a kernel `KEY_*` code.
    fn keyboard_key(&mut self, device: DeviceId, time: u64, key: u32, state: KeyState) {
        let _ = (device, time, key, state);
    }

    /// A new touch point appeared.
    ///
    /// `slot` is the device-local multi-touch slot (`None` for single-touch
    /// devices), `seat_slot` the stable seat-wide identifier of this touch.
    fn touch_down(
        &mut self,
        device: DeviceId,
        time: u64,
        slot: Option<u32>,
        seat_slot: u32,
        x: f64,
        y: f64,
    ) {
        let _ = (device, time, slot, seat_slot, x, y);
    }

    /// A touch point moved.
    fn touch_motion(
        &mut self,
        device: DeviceId,
        time: u64,
        slot: Option<u32>,
        seat_slot: u32,
        x: f64,
        y: f64,
    ) {
        let _ = (device, time, slot, seat_slot, x, y);
    }

    /// A touch point disappeared. Its `seat_slot` is free for reuse afterwards.
    fn touch_up(&mut self, device: DeviceId, time: u64, slot: Option<u32>, seat_slot: u32) {
        let _ = (device, time, slot, seat_slot);
    }

    /// End of a set of touch points at one device sample time.
    ///
    /// Follows the last touch event of the frame with the same timestamp.
    fn touch_frame(&mut self, device: DeviceId, time: u64) {
        let _ = (device, time);
    }

    /// A device was added to the seat.
    fn device_added(&mut self, device: DeviceId) {
        let _ = device;
    }

    /// A device was removed from the seat.
    fn device_removed(&mut self, device: DeviceId) {
        let _ = device;
    }
}

/// A normalized input event.
///
/// The enum mirror of the [`InputSink`] callbacks, used where events are
/// queued instead of handled in place, most prominently by the
/// [`calloop::EventSource`] implementation of
/// [`EvdevContext`](crate::backend::evdev::EvdevContext).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// An input device was attached to the seat
    DeviceAdded {
        /// The added device
        device: DeviceId,
    },
    /// An input device was removed from the seat
    DeviceRemoved {
        /// The removed device
        device: DeviceId,
    },
    /// A keyboard key event occurred
    KeyboardKey {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Kernel `KEY_*` code
        key: u32,
        /// New state of the key
        state: KeyState,
    },
    /// A relative pointer motion occurred
    PointerMotion {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Accelerated delta on the x axis
        dx: f64,
        /// Accelerated delta on the y axis
        dy: f64,
    },
    /// An absolute pointer motion occurred
    PointerMotionAbsolute {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Calibrated x coordinate in device space
        x: f64,
        /// Calibrated y coordinate in device space
        y: f64,
    },
    /// A pointer button was pressed or released
    PointerButton {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Kernel `BTN_*` code
        button: u32,
        /// New state of the button
        state: ButtonState,
    },
    /// A scroll event occurred on an axis
    PointerAxis {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// The scroll axis
        axis: Axis,
        /// Scroll amount in motion-equivalent units
        amount: f64,
    },
    /// A new touch point appeared
    TouchDown {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Device-local slot, if the device is multi-touch
        slot: Option<u32>,
        /// Stable seat-wide touch identifier
        seat_slot: u32,
        /// Calibrated x coordinate in device space
        x: f64,
        /// Calibrated y coordinate in device space
        y: f64,
    },
    /// A touch point moved
    TouchMotion {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Device-local slot, if the device is multi-touch
        slot: Option<u32>,
        /// Stable seat-wide touch identifier
        seat_slot: u32,
        /// Calibrated x coordinate in device space
        x: f64,
        /// Calibrated y coordinate in device space
        y: f64,
    },
    /// A touch point disappeared
    TouchUp {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
        /// Device-local slot, if the device is multi-touch
        slot: Option<u32>,
        /// Stable seat-wide touch identifier
        seat_slot: u32,
    },
    /// End of a set of touch points at one device sample time
    TouchFrame {
        /// The originating device
        device: DeviceId,
        /// Event time in milliseconds
        time: u64,
    },
}

/// Buffering sink: every notification is pushed as an [`InputEvent`].
///
/// Useful for tests and for adapters that deliver events from a queue.
impl InputSink for Vec<InputEvent> {
    fn pointer_motion(&mut self, device: DeviceId, time: u64, dx: f64, dy: f64) {
        self.push(InputEvent::PointerMotion { device, time, dx, dy });
    }

    fn pointer_motion_absolute(&mut self, device: DeviceId, time: u64, x: f64, y: f64) {
        self.push(InputEvent::PointerMotionAbsolute { device, time, x, y });
    }

    fn pointer_button(&mut self, device: DeviceId, time: u64, button: u32, state: ButtonState) {
        self.push(InputEvent::PointerButton {
            device,
            time,
            button,
            state,
        });
    }

    fn pointer_axis(&mut self, device: DeviceId, time: u64, axis: Axis, amount: f64) {
        self.push(InputEvent::PointerAxis {
            device,
            time,
            axis,
            amount,
        });
    }

    fn keyboard_key(&mut self, device: DeviceId, time: u64, key: u32, state: KeyState) {
        self.push(InputEvent::KeyboardKey {
            device,
            time,
            key,
            state,
        });
    }

    fn touch_down(
        &mut self,
        device: DeviceId,
        time: u64,
        slot: Option<u32>,
        seat_slot: u32,
        x: f64,
        y: f64,
    ) {
        self.push(InputEvent::TouchDown {
            device,
            time,
            slot,
            seat_slot,
            x,
            y,
        });
    }

    fn touch_motion(
        &mut self,
        device: DeviceId,
        time: u64,
        slot: Option<u32>,
        seat_slot: u32,
        x: f64,
        y: f64,
    ) {
        self.push(InputEvent::TouchMotion {
            device,
            time,
            slot,
            seat_slot,
            x,
            y,
        });
    }

    fn touch_up(&mut self, device: DeviceId, time: u64, slot: Option<u32>, seat_slot: u32) {
        self.push(InputEvent::TouchUp {
            device,
            time,
            slot,
            seat_slot,
        });
    }

    fn touch_frame(&mut self, device: DeviceId, time: u64) {
        self.push(InputEvent::TouchFrame { device, time });
    }

    fn device_added(&mut self, device: DeviceId) {
        self.push(InputEvent::DeviceAdded { device });
    }

    fn device_removed(&mut self, device: DeviceId) {
        self.push(InputEvent::DeviceRemoved { device });
    }
}
