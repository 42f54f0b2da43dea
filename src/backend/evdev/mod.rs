//! Processing of evdev input devices.
//!
//! An [`EvdevContext`] owns the devices of one seat. Devices are opened
//! through the host's [`Session`] broker, classified by capability and
//! driven by a per-device dispatcher that turns raw evdev frames into the
//! normalized events of [`backend::input`](crate::backend::input).
//!
//! The context can be inserted into a [`calloop`] event loop directly
//! (it implements [`calloop::EventSource`], registering one readiness
//! token per device), or driven manually through
//! [`EvdevContext::dispatch`] from any other readiness mechanism. After
//! adding or removing devices while inserted in a loop, refresh the
//! registration with `LoopHandle::update`.

use std::fmt;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use calloop::{EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory};
use rustix::fs::OFlags;
use tracing::{debug, info, info_span, warn};

pub mod calibration;
pub(crate) mod codes;
pub mod decoder;
pub mod fallback;
pub mod filter;
pub mod keys;

pub use self::calibration::{parse_calibration_property, Calibration, CALIBRATION_MATRIX_PROPERTY};
pub use self::decoder::{AbsInfo, EventDecoder, FdDecoder, RawEvent, ReadMode, ReadStatus};
pub use self::fallback::FallbackDispatch;
pub use self::filter::{LinearAccelerator, MotionDelta, MotionFilter, SmoothAccelerator};
pub use self::keys::{key_type, KeyType};

use self::codes::{
    ABS_MT_POSITION_X, ABS_MT_POSITION_Y, ABS_X, ABS_Y, BTN_TOUCH, EV_LED, EV_SYN, KEY_MAX,
    LED_CAPSL, LED_NUML, LED_SCROLLL, REL_X, REL_Y, SYN_REPORT,
};
use crate::backend::input::{DeviceCapability, DeviceId, InputEvent, InputSink, Led};
use crate::backend::session::Session;
use crate::seat::Seat;
use crate::utils::clock::{Clock, Monotonic};

/// Polymorphic per-device event processing.
///
/// The stock implementation is [`FallbackDispatch`]; device classes with
/// their own frame semantics (touchpads) plug in here with the same
/// surface.
pub trait DeviceDispatch: fmt::Debug {
    /// Processes one decoded event.
    fn process(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent);

    /// Releases everything the device still holds (pressed keys, seat
    /// slots) ahead of destruction. `time` is the current monotonic time
    /// in milliseconds.
    fn remove(&mut self, ctx: &mut DispatchContext<'_>, time: u64);
}

/// Device environment handed to a [`DeviceDispatch`].
pub struct DispatchContext<'a> {
    /// Id of the device being dispatched.
    pub device: DeviceId,
    /// Seat capabilities of the device.
    pub caps: DeviceCapability,
    /// Calibration of the device, if it has absolute axes.
    pub calibration: Option<&'a Calibration>,
    /// The seat shared by all devices of the context.
    pub seat: &'a mut Seat,
    /// Receiver of the produced notifications.
    pub sink: &'a mut dyn InputSink,
}

impl fmt::Debug for DispatchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("device", &self.device)
            .field("caps", &self.caps)
            .field("seat", &self.seat)
            .finish_non_exhaustive()
    }
}

/// Attach-time configuration of a device.
#[derive(Debug, Default, Clone)]
pub struct DeviceConfig {
    /// Default calibration matrix, typically parsed from the
    /// [`CALIBRATION_MATRIX_PROPERTY`] udev property with
    /// [`parse_calibration_property`].
    pub calibration_matrix: Option<[f32; 6]>,
}

/// Errors thrown when attaching a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError<E: fmt::Debug> {
    /// The device is well-formed but provides nothing this backend
    /// handles. Not an error condition for callers probing every node of
    /// `/dev/input`.
    #[error("device does not provide any usable capability")]
    Unhandled,
    /// The session broker refused to open the device node.
    #[error("opening the device node failed: {0:?}")]
    Open(E),
    /// The device did not answer the evdev queries.
    #[error("querying the device failed")]
    Decoder(#[source] io::Error),
}

/// One evdev input device attached to a seat.
pub struct Device {
    id: DeviceId,
    name: String,
    devnode: Option<PathBuf>,
    caps: DeviceCapability,
    calibration: Option<Calibration>,
    decoder: Box<dyn EventDecoder>,
    dispatch: Box<dyn DeviceDispatch>,
    token: Option<Token>,
    registered: bool,
    detached: bool,
    span: tracing::Span,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("devnode", &self.devnode)
            .field("caps", &self.caps)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// The id of this device within its context.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Human-readable device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device node this device was opened from, if any.
    pub fn devnode(&self) -> Option<&Path> {
        self.devnode.as_deref()
    }

    /// Seat capabilities of this device.
    pub fn capabilities(&self) -> DeviceCapability {
        self.caps
    }

    /// Physical size of the device in millimeters.
    ///
    /// `None` for relative devices and for devices that do not report a
    /// resolution (their size cannot be trusted).
    pub fn size(&self) -> Option<(f64, f64)> {
        self.calibration.as_ref()?.size()
    }

    /// Whether this device accepts a calibration matrix.
    pub fn has_calibration(&self) -> bool {
        self.calibration.is_some()
    }

    /// Installs a user calibration matrix.
    ///
    /// Ignored on devices without absolute axes; setting a matrix never
    /// fails otherwise.
    pub fn set_calibration(&mut self, matrix: [f32; 6]) {
        if let Some(calibration) = self.calibration.as_mut() {
            calibration.set_matrix(matrix);
        }
    }

    /// The current user matrix and whether it is non-default.
    pub fn calibration(&self) -> Option<([f32; 6], bool)> {
        self.calibration.as_ref().map(|c| c.matrix())
    }

    /// The default calibration matrix seeded at attach time.
    pub fn default_calibration(&self) -> Option<[f32; 6]> {
        self.calibration.as_ref().map(|c| c.default_matrix())
    }

    /// Updates the keyboard LEDs. Best effort, the write result is
    /// intentionally discarded.
    pub fn led_update(&self, leds: Led) {
        if !self.caps.contains(DeviceCapability::KEYBOARD) {
            return;
        }
        let Some(fd) = self.decoder.fd() else {
            return;
        };
        let mut buf = Vec::with_capacity(4 * size_of::<libc::input_event>());
        for (led, code) in [
            (Led::NUMLOCK, LED_NUML),
            (Led::CAPSLOCK, LED_CAPSL),
            (Led::SCROLLLOCK, LED_SCROLLL),
        ] {
            push_event(&mut buf, EV_LED, code, leds.contains(led) as i32);
        }
        push_event(&mut buf, EV_SYN, SYN_REPORT, 0);
        let _ = rustix::io::write(fd, &buf);
    }

    fn process(&mut self, seat: &mut Seat, sink: &mut dyn InputSink, event: &RawEvent) {
        let _guard = self.span.enter();
        let mut ctx = DispatchContext {
            device: self.id,
            caps: self.caps,
            calibration: self.calibration.as_ref(),
            seat,
            sink,
        };
        self.dispatch.process(&mut ctx, event);
    }
}

fn push_event(buf: &mut Vec<u8>, kind: u16, code: u16, value: i32) {
    let event = libc::input_event {
        time: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        type_: kind,
        code,
        value,
    };
    // Safety: input_event is plain old data.
    let bytes = unsafe {
        std::slice::from_raw_parts(&event as *const _ as *const u8, size_of::<libc::input_event>())
    };
    buf.extend_from_slice(bytes);
}

/// The evdev devices of one seat.
///
/// Create it over a [`Session`], attach devices with
/// [`EvdevContext::add_device`], and feed readiness either through
/// [`calloop`] or by calling [`EvdevContext::dispatch`] yourself.
pub struct EvdevContext<S: Session> {
    session: S,
    seat: Seat,
    devices: Vec<Option<Device>>,
    clock: Clock<Monotonic>,
    span: tracing::Span,
}

impl<S: Session> fmt::Debug for EvdevContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvdevContext")
            .field("seat", &self.seat)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl<S: Session> EvdevContext<S> {
    /// Creates an empty context for the session's seat.
    pub fn new(session: S) -> EvdevContext<S> {
        let seat_name = session.seat();
        let span = info_span!("backend_evdev", seat = %seat_name);
        info!(parent: &span, "initializing an evdev backend");
        EvdevContext {
            session,
            seat: Seat::new(seat_name),
            devices: Vec::new(),
            clock: Clock::new(),
            span,
        }
    }

    /// The seat all devices of this context belong to.
    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    /// The attached devices.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().flatten()
    }

    /// The device with the given id, if attached.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0 as usize)?.as_ref()
    }

    /// Mutable access to the device with the given id.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id.0 as usize)?.as_mut()
    }

    /// Opens the device node through the session broker and attaches it.
    ///
    /// The sink receives `device_added` before this returns. Devices
    /// without a usable capability are closed again and reported as
    /// [`DeviceError::Unhandled`].
    pub fn add_device(
        &mut self,
        path: &Path,
        config: &DeviceConfig,
        sink: &mut dyn InputSink,
    ) -> Result<DeviceId, DeviceError<S::Error>> {
        let span = self.span.clone();
        let _guard = span.enter();
        let fd = self
            .session
            .open(path, OFlags::RDWR | OFlags::NONBLOCK)
            .map_err(DeviceError::Open)?;
        let decoder = match FdDecoder::new(fd) {
            Ok(decoder) => decoder,
            Err((fd, err)) => {
                let _ = self.session.close(fd);
                return Err(DeviceError::Decoder(err));
            }
        };
        self.attach(Box::new(decoder), Some(path.to_path_buf()), config, sink)
    }

    /// Attaches a device from an already constructed decoder.
    ///
    /// This is how decoder wrappers enter the pipeline, e.g. a slot
    /// converter bridging the legacy unslotted multi-touch protocol.
    pub fn add_device_from_decoder(
        &mut self,
        decoder: Box<dyn EventDecoder>,
        config: &DeviceConfig,
        sink: &mut dyn InputSink,
    ) -> Result<DeviceId, DeviceError<S::Error>> {
        let span = self.span.clone();
        let _guard = span.enter();
        self.attach(decoder, None, config, sink)
    }

    fn attach(
        &mut self,
        decoder: Box<dyn EventDecoder>,
        devnode: Option<PathBuf>,
        config: &DeviceConfig,
        sink: &mut dyn InputSink,
    ) -> Result<DeviceId, DeviceError<S::Error>> {
        let Some((caps, dispatch, calibration)) = configure(decoder.as_ref(), config) else {
            debug!(name = decoder.name(), "device without usable capabilities");
            if let Some(fd) = decoder.into_fd() {
                let _ = self.session.close(fd);
            }
            return Err(DeviceError::Unhandled);
        };

        let index = match self.devices.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                self.devices.push(None);
                self.devices.len() - 1
            }
        };
        let id = DeviceId(index as u32);
        let name = decoder.name().to_owned();
        let span = info_span!("evdev_device", device = %id, name = %name);
        info!(parent: &span, caps = ?caps, "new device");

        self.devices[index] = Some(Device {
            id,
            name,
            devnode,
            caps,
            calibration,
            decoder,
            dispatch: Box::new(dispatch),
            token: None,
            registered: false,
            detached: false,
            span,
        });
        sink.device_added(id);
        Ok(id)
    }

    /// Removes a device from the seat.
    ///
    /// Keys and buttons still pressed on the device are released with the
    /// current time, seat slots of its touches are returned to the pool,
    /// and the file descriptor goes back to the session broker.
    pub fn remove_device(&mut self, id: DeviceId, sink: &mut dyn InputSink) {
        let Some(mut device) = self.devices.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        info!(parent: &device.span, "removing device");

        let time = self.clock.now().as_millis();
        let mut ctx = DispatchContext {
            device: id,
            caps: device.caps,
            calibration: device.calibration.as_ref(),
            seat: &mut self.seat,
            sink,
        };
        device.dispatch.remove(&mut ctx, time);

        sink.device_removed(id);
        if let Some(fd) = device.decoder.into_fd() {
            let _ = self.session.close(fd);
        }
    }

    /// Drains one device. Call when its file descriptor became readable.
    pub fn dispatch_device(&mut self, id: DeviceId, sink: &mut dyn InputSink) {
        self.dispatch_index(id.0 as usize, sink);
    }

    /// Drains every attached device.
    ///
    /// All descriptors are non-blocking, so this is cheap to call on any
    /// wakeup when no finer readiness information is available.
    pub fn dispatch(&mut self, sink: &mut dyn InputSink) {
        for index in 0..self.devices.len() {
            self.dispatch_index(index, sink);
        }
    }

    #[profiling::function]
    fn dispatch_index(&mut self, index: usize, sink: &mut dyn InputSink) {
        let Some(mut device) = self.devices.get_mut(index).and_then(Option::take) else {
            return;
        };
        if !device.detached {
            if let Err(err) = drain_device(&mut device, &mut self.seat, sink) {
                warn!(parent: &device.span, "transport failed, detaching device: {err}");
                device.detached = true;
            }
        }
        self.devices[index] = Some(device);
    }
}

/// Reads a device dry, recovering from kernel queue overflows on the way.
fn drain_device(
    device: &mut Device,
    seat: &mut Seat,
    sink: &mut dyn InputSink,
) -> io::Result<()> {
    loop {
        match device.decoder.next_event(ReadMode::Normal)? {
            None => return Ok(()),
            Some(ReadStatus::Event(event)) => device.process(seat, sink, &event),
            Some(ReadStatus::Resync(marker)) => {
                debug!(parent: &device.span, "syncing up after kernel queue overflow");
                // seal the interrupted frame before replaying the recovery
                // stream
                let report = RawEvent {
                    time_sec: marker.time_sec,
                    time_usec: marker.time_usec,
                    kind: EV_SYN,
                    code: SYN_REPORT,
                    value: 0,
                };
                device.process(seat, sink, &report);
                while let Some(status) = device.decoder.next_event(ReadMode::Resync)? {
                    if let ReadStatus::Event(event) = status {
                        device.process(seat, sink, &event);
                    }
                }
            }
        }
    }
}

/// Classifies a device and builds its pipeline state.
///
/// Returns `None` for devices providing no capability this backend
/// handles.
fn configure(
    decoder: &dyn EventDecoder,
    config: &DeviceConfig,
) -> Option<(DeviceCapability, FallbackDispatch, Option<Calibration>)> {
    let absinfo_x = decoder.abs_info(ABS_X);
    let absinfo_y = decoder.abs_info(ABS_Y);
    let has_abs = absinfo_x.is_some() && absinfo_y.is_some();
    let has_mt_position = decoder.has_event_code(codes::EV_ABS, ABS_MT_POSITION_X)
        && decoder.has_event_code(codes::EV_ABS, ABS_MT_POSITION_Y);
    let slot_count = decoder.slot_count();
    let is_mt = has_mt_position && slot_count.is_some();
    if has_mt_position && slot_count.is_none() {
        // protocol A: without a slot converter wrapped around the decoder
        // only the BTN_TOUCH single-touch view of the device is usable
        info!(
            name = decoder.name(),
            "unslotted multi-touch device, handling as single-touch"
        );
    }
    let has_rel = decoder.has_event_code(codes::EV_REL, REL_X)
        && decoder.has_event_code(codes::EV_REL, REL_Y);

    let mut has_button = false;
    let mut has_key = false;
    for code in 0..=KEY_MAX {
        if decoder.has_event_code(codes::EV_KEY, code) {
            match key_type(code) {
                KeyType::Button => has_button = true,
                KeyType::Key => has_key = true,
                KeyType::None => {}
            }
        }
    }
    let has_touch = has_mt_position || decoder.has_event_code(codes::EV_KEY, BTN_TOUCH);

    let mut caps = DeviceCapability::empty();
    if (has_abs || has_rel) && has_button {
        caps |= DeviceCapability::POINTER;
    }
    if has_key || decoder.has_event_type(EV_LED) {
        caps |= DeviceCapability::KEYBOARD;
    }
    if has_touch && !has_button {
        caps |= DeviceCapability::TOUCH;
    }
    if caps.is_empty() {
        return None;
    }

    let calibration = match (absinfo_x, absinfo_y) {
        (Some(x), Some(y)) => {
            let mut calibration = Calibration::new(x, y);
            if let Some(matrix) = config.calibration_matrix {
                calibration.set_default_matrix(matrix);
            }
            Some(calibration)
        }
        _ => None,
    };

    let filter: Option<Box<dyn MotionFilter>> = caps.contains(DeviceCapability::POINTER).then(|| {
        let resolution = calibration
            .as_ref()
            .map(|c| c.absinfo_x().resolution)
            .filter(|resolution| *resolution > 0);
        let accelerator = match resolution {
            Some(units_per_mm) => SmoothAccelerator::with_dpi(units_per_mm as f64 * 25.4),
            None => SmoothAccelerator::new(),
        };
        Box::new(accelerator) as Box<dyn MotionFilter>
    });

    let dispatch = FallbackDispatch::new(slot_count.unwrap_or(1) as usize, is_mt, filter);
    Some((caps, dispatch, calibration))
}

impl<S: Session> EventSource for EvdevContext<S> {
    type Event = InputEvent;
    type Metadata = ();
    type Ret = ();
    type Error = io::Error;

    #[profiling::function]
    fn process_events<F>(
        &mut self,
        _: Readiness,
        token: Token,
        mut callback: F,
    ) -> Result<PostAction, io::Error>
    where
        F: FnMut(InputEvent, &mut ()),
    {
        let index = self
            .devices
            .iter()
            .position(|device| device.as_ref().and_then(|device| device.token) == Some(token));

        let mut queue: Vec<InputEvent> = Vec::new();
        let mut action = PostAction::Continue;
        if let Some(index) = index {
            self.dispatch_index(index, &mut queue);
            if self.devices[index]
                .as_ref()
                .map_or(false, |device| device.detached)
            {
                // drop the dead fd from the loop on the way out
                action = PostAction::Reregister;
            }
        }
        for event in queue {
            callback(event, &mut ());
        }
        Ok(action)
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        for device in self.devices.iter_mut().flatten() {
            if device.detached {
                continue;
            }
            let Some(fd) = device.decoder.fd() else {
                continue;
            };
            let token = factory.token();
            // Safety: the fd stays open until the device is removed, which
            // requires refreshing this source's registration.
            unsafe {
                poll.register(fd, Interest::READ, Mode::Level, token)?;
            }
            device.token = Some(token);
            device.registered = true;
        }
        Ok(())
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        for device in self.devices.iter_mut().flatten() {
            let Some(fd) = device.decoder.fd() else {
                continue;
            };
            if device.detached {
                if device.registered {
                    poll.unregister(fd)?;
                    device.registered = false;
                    device.token = None;
                }
                continue;
            }
            let token = factory.token();
            if device.registered {
                poll.reregister(fd, Interest::READ, Mode::Level, token)?;
            } else {
                // Safety: as in register
                unsafe {
                    poll.register(fd, Interest::READ, Mode::Level, token)?;
                }
                device.registered = true;
            }
            device.token = Some(token);
        }
        Ok(())
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        for device in self.devices.iter_mut().flatten() {
            if device.registered {
                if let Some(fd) = device.decoder.fd() {
                    poll.unregister(fd)?;
                }
                device.registered = false;
                device.token = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::codes::{
        ABS_MT_SLOT, ABS_MT_TRACKING_ID, BTN_LEFT, BTN_RIGHT, EV_ABS, EV_KEY, EV_REL, KEY_A,
        KEY_CAPSLOCK, REL_WHEEL,
    };
    use super::*;
    use crate::backend::input::KeyState;
    use crate::backend::session::DirectSession;
    use std::collections::VecDeque;

    #[derive(Debug)]
    enum Script {
        Event(RawEvent),
        Resync(RawEvent),
        Fail(io::ErrorKind),
    }

    #[derive(Debug, Default)]
    struct FakeDecoder {
        name: String,
        keys: Vec<u16>,
        rels: Vec<u16>,
        abs: Vec<(u16, AbsInfo)>,
        leds: bool,
        slots: Option<u32>,
        script: VecDeque<Script>,
        resync: VecDeque<RawEvent>,
    }

    impl FakeDecoder {
        fn named(name: &str) -> FakeDecoder {
            FakeDecoder {
                name: name.into(),
                ..Default::default()
            }
        }
    }

    impl EventDecoder for FakeDecoder {
        fn name(&self) -> &str {
            &self.name
        }

        fn has_event_type(&self, kind: u16) -> bool {
            match kind {
                codes::EV_SYN => true,
                codes::EV_KEY => !self.keys.is_empty(),
                codes::EV_REL => !self.rels.is_empty(),
                codes::EV_ABS => !self.abs.is_empty(),
                codes::EV_LED => self.leds,
                _ => false,
            }
        }

        fn has_event_code(&self, kind: u16, code: u16) -> bool {
            match kind {
                codes::EV_KEY => self.keys.contains(&code),
                codes::EV_REL => self.rels.contains(&code),
                codes::EV_ABS => self.abs.iter().any(|(c, _)| *c == code),
                _ => self.has_event_type(kind),
            }
        }

        fn abs_info(&self, code: u16) -> Option<AbsInfo> {
            self.abs
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, info)| *info)
        }

        fn slot_count(&self) -> Option<u32> {
            self.slots
        }

        fn next_event(&mut self, mode: ReadMode) -> io::Result<Option<ReadStatus>> {
            if mode == ReadMode::Resync {
                return Ok(self.resync.pop_front().map(ReadStatus::Event));
            }
            match self.script.pop_front() {
                None => Ok(None),
                Some(Script::Event(event)) => Ok(Some(ReadStatus::Event(event))),
                Some(Script::Resync(marker)) => Ok(Some(ReadStatus::Resync(marker))),
                Some(Script::Fail(kind)) => Err(io::Error::from(kind)),
            }
        }
    }

    fn ev(kind: u16, code: u16, value: i32) -> RawEvent {
        RawEvent {
            time_sec: 1,
            time_usec: 0,
            kind,
            code,
            value,
        }
    }

    fn abs_axis(min: i32, max: i32, resolution: i32) -> AbsInfo {
        AbsInfo {
            minimum: min,
            maximum: max,
            fuzz: 0,
            flat: 0,
            resolution,
        }
    }

    fn context() -> EvdevContext<DirectSession> {
        EvdevContext::new(DirectSession::new("seat0"))
    }

    fn mouse() -> FakeDecoder {
        FakeDecoder {
            keys: vec![BTN_LEFT, BTN_RIGHT],
            rels: vec![REL_X, REL_Y, REL_WHEEL],
            ..FakeDecoder::named("test mouse")
        }
    }

    fn keyboard() -> FakeDecoder {
        FakeDecoder {
            keys: vec![KEY_A, KEY_CAPSLOCK],
            leds: true,
            ..FakeDecoder::named("test keyboard")
        }
    }

    fn touchscreen() -> FakeDecoder {
        let axis = abs_axis(0, 1000, 0);
        FakeDecoder {
            keys: vec![BTN_TOUCH],
            abs: vec![
                (ABS_X, axis),
                (ABS_Y, axis),
                (ABS_MT_POSITION_X, axis),
                (ABS_MT_POSITION_Y, axis),
                (ABS_MT_SLOT, abs_axis(0, 4, 0)),
            ],
            slots: Some(5),
            ..FakeDecoder::named("test touchscreen")
        }
    }

    #[test]
    fn classification() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let config = DeviceConfig::default();

        let id = ctx
            .add_device_from_decoder(Box::new(mouse()), &config, &mut sink)
            .unwrap();
        assert_eq!(
            ctx.device(id).unwrap().capabilities(),
            DeviceCapability::POINTER
        );
        assert!(!ctx.device(id).unwrap().has_calibration());
        assert_eq!(ctx.device(id).unwrap().size(), None);

        let id = ctx
            .add_device_from_decoder(Box::new(keyboard()), &config, &mut sink)
            .unwrap();
        assert_eq!(
            ctx.device(id).unwrap().capabilities(),
            DeviceCapability::KEYBOARD
        );

        let id = ctx
            .add_device_from_decoder(Box::new(touchscreen()), &config, &mut sink)
            .unwrap();
        assert_eq!(
            ctx.device(id).unwrap().capabilities(),
            DeviceCapability::TOUCH
        );
        assert!(ctx.device(id).unwrap().has_calibration());

        assert_eq!(
            sink.iter()
                .filter(|e| matches!(e, InputEvent::DeviceAdded { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn touchscreen_with_buttons_is_a_pointer() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let mut decoder = touchscreen();
        decoder.keys.push(BTN_LEFT);
        let id = ctx
            .add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();
        assert_eq!(
            ctx.device(id).unwrap().capabilities(),
            DeviceCapability::POINTER
        );
    }

    #[test]
    fn unhandled_device_is_a_sentinel() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let result = ctx.add_device_from_decoder(
            Box::new(FakeDecoder::named("accelerometer")),
            &DeviceConfig::default(),
            &mut sink,
        );
        assert!(matches!(result, Err(DeviceError::Unhandled)));
        assert!(sink.is_empty());
        assert_eq!(ctx.devices().count(), 0);
    }

    #[test]
    fn fake_resolution_hides_size_and_seeded_matrix_calibrates() {
        let mut ctx = context();
        let mut sink = Vec::new();

        // resolution 0 on both axes: size is unavailable
        let id = ctx
            .add_device_from_decoder(
                Box::new(touchscreen()),
                &DeviceConfig {
                    calibration_matrix: parse_calibration_property("1 0 0 0 1 0"),
                },
                &mut sink,
            )
            .unwrap();
        let device = ctx.device(id).unwrap();
        assert_eq!(device.size(), None);
        let (matrix, non_default) = device.calibration().unwrap();
        assert_eq!(matrix, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(!non_default);

        // a real resolution reports millimeters
        let mut decoder = touchscreen();
        let axis = abs_axis(0, 999, 10);
        decoder.abs = vec![
            (ABS_X, axis),
            (ABS_Y, axis),
            (ABS_MT_POSITION_X, axis),
            (ABS_MT_POSITION_Y, axis),
        ];
        decoder.slots = Some(5);
        let id = ctx
            .add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();
        assert_eq!(ctx.device(id).unwrap().size(), Some((99.9, 99.9)));
    }

    #[test]
    fn calibration_roundtrip_through_device() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let id = ctx
            .add_device_from_decoder(Box::new(touchscreen()), &DeviceConfig::default(), &mut sink)
            .unwrap();

        let device = ctx.device_mut(id).unwrap();
        let matrix = [1.2, 3.4, 5.6, 7.8, 9.10, 11.12];
        device.set_calibration(matrix);
        assert_eq!(device.calibration(), Some((matrix, true)));
        assert_eq!(device.default_calibration(), Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]));
    }

    #[test]
    fn overflow_recovery_flushes_and_resumes() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let mut decoder = mouse();
        decoder.script = VecDeque::from([
            Script::Event(ev(EV_REL, REL_X, 5)),
            Script::Resync(ev(codes::EV_SYN, codes::SYN_DROPPED, 0)),
            Script::Event(ev(EV_REL, REL_X, 3)),
            Script::Event(ev(codes::EV_SYN, codes::SYN_REPORT, 0)),
        ]);
        let id = ctx
            .add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();

        sink.clear();
        ctx.dispatch(&mut sink);

        let motions: Vec<f64> = sink
            .iter()
            .filter_map(|e| match e {
                InputEvent::PointerMotion { dx, .. } => Some(*dx),
                _ => None,
            })
            .collect();
        // one motion flushed by the synthetic report at the overflow, one
        // from the frame read after the resync drain
        assert_eq!(motions.len(), 2);
        assert!(motions.iter().all(|dx| *dx > 0.0));
        assert!(!ctx.device(id).unwrap().detached);
    }

    #[test]
    fn transport_failure_detaches_without_closing() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let mut decoder = mouse();
        decoder.script = VecDeque::from([
            Script::Event(ev(EV_KEY, BTN_LEFT, 1)),
            Script::Event(ev(codes::EV_SYN, codes::SYN_REPORT, 0)),
            Script::Fail(io::ErrorKind::BrokenPipe),
        ]);
        let id = ctx
            .add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();

        ctx.dispatch(&mut sink);
        assert!(ctx.device(id).unwrap().detached);

        // the device stays attached until the owner removes it
        sink.clear();
        ctx.dispatch(&mut sink);
        assert!(sink.is_empty());

        ctx.remove_device(id, &mut sink);
        assert!(sink
            .iter()
            .any(|e| matches!(e, InputEvent::DeviceRemoved { .. })));
    }

    #[test]
    fn remove_synthesizes_releases_for_held_keys() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let mut decoder = keyboard();
        decoder.script = VecDeque::from([
            Script::Event(ev(EV_KEY, KEY_A, 1)),
            Script::Event(ev(codes::EV_SYN, codes::SYN_REPORT, 0)),
        ]);
        let id = ctx
            .add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();
        ctx.dispatch(&mut sink);

        sink.clear();
        ctx.remove_device(id, &mut sink);

        let releases: Vec<u32> = sink
            .iter()
            .filter_map(|e| match e {
                InputEvent::KeyboardKey {
                    key,
                    state: KeyState::Released,
                    ..
                } => Some(*key),
                _ => None,
            })
            .collect();
        assert_eq!(releases, vec![KEY_A as u32]);
        assert!(sink
            .iter()
            .any(|e| matches!(e, InputEvent::DeviceRemoved { .. })));
        assert!(ctx.device(id).is_none());
    }

    #[test]
    fn touch_frames_survive_overflow_recovery() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let mut decoder = touchscreen();
        decoder.script = VecDeque::from([
            Script::Event(ev(EV_ABS, ABS_MT_SLOT, 0)),
            Script::Event(ev(EV_ABS, ABS_MT_TRACKING_ID, 42)),
            Script::Event(ev(EV_ABS, ABS_MT_POSITION_X, 10)),
            Script::Event(ev(EV_ABS, ABS_MT_POSITION_Y, 10)),
            Script::Resync(ev(codes::EV_SYN, codes::SYN_DROPPED, 0)),
        ]);
        decoder.resync = VecDeque::from([
            ev(EV_ABS, ABS_MT_TRACKING_ID, -1),
            ev(codes::EV_SYN, codes::SYN_REPORT, 0),
        ]);
        ctx.add_device_from_decoder(Box::new(decoder), &DeviceConfig::default(), &mut sink)
            .unwrap();

        sink.clear();
        ctx.dispatch(&mut sink);

        // the synthetic report sealed the down, the resync stream ended it
        assert!(sink
            .iter()
            .any(|e| matches!(e, InputEvent::TouchDown { .. })));
        assert!(sink.iter().any(|e| matches!(e, InputEvent::TouchUp { .. })));
        assert_eq!(ctx.seat().slot_map(), 0);
    }

    #[test]
    fn led_update_without_fd_is_a_noop() {
        let mut ctx = context();
        let mut sink = Vec::new();
        let id = ctx
            .add_device_from_decoder(Box::new(keyboard()), &DeviceConfig::default(), &mut sink)
            .unwrap();
        ctx.device(id).unwrap().led_update(Led::NUMLOCK | Led::CAPSLOCK);
    }
}
