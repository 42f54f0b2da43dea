//! The fallback dispatcher.
//!
//! Translates the evdev convention (many field updates per frame,
//! committed by `SYN_REPORT`) into at most one semantic event per frame
//! per pointing stream. Field updates accumulate into a *pending event*;
//! an update that cannot extend the pending event flushes it first. The
//! flush is where calibration, pointer acceleration and seat-slot
//! allocation happen.

use tracing::{debug, warn};

use super::codes::{
    ABS_MT_POSITION_X, ABS_MT_POSITION_Y, ABS_MT_SLOT, ABS_MT_TRACKING_ID, ABS_X, ABS_Y,
    BTN_TOUCH, EV_ABS, EV_KEY, EV_REL, EV_SYN, REL_HWHEEL, REL_WHEEL, REL_X, REL_Y, SYN_REPORT,
};
use super::decoder::RawEvent;
use super::filter::{MotionDelta, MotionFilter};
use super::keys::{key_type, KeyCounter, KeyType};
use super::{DeviceDispatch, DispatchContext};
use crate::backend::input::{Axis, ButtonState, DeviceCapability, KeyState};

/// Scroll distance of one wheel detent, in motion-equivalent units.
const DEFAULT_AXIS_STEP_DISTANCE: f64 = 10.0;

/// The class of semantic event currently accumulating between two
/// `SYN_REPORT`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingEvent {
    None,
    RelativeMotion,
    AbsoluteMotion,
    MtDown,
    MtMotion,
    MtUp,
    TouchDown,
    TouchUp,
}

#[derive(Debug, Clone, Copy)]
struct SlotRecord {
    x: i32,
    y: i32,
    /// Seat slot of the touch in this device slot, -1 while inactive.
    seat_slot: i32,
}

impl Default for SlotRecord {
    fn default() -> Self {
        SlotRecord {
            x: 0,
            y: 0,
            seat_slot: -1,
        }
    }
}

/// Pipeline state of a device driven by the fallback dispatcher.
#[derive(Debug)]
pub struct FallbackDispatch {
    pending: PendingEvent,
    rel_dx: i32,
    rel_dy: i32,
    abs_x: i32,
    abs_y: i32,
    /// Seat slot of the single-touch contact, -1 while inactive.
    abs_seat_slot: i32,
    /// Currently addressed multi-touch slot.
    slot: usize,
    slots: Box<[SlotRecord]>,
    is_mt: bool,
    keys: KeyCounter,
    filter: Option<Box<dyn MotionFilter>>,
}

impl FallbackDispatch {
    /// Creates the dispatcher state for a device with `slot_count`
    /// multi-touch slots (1 for single-touch devices).
    pub(crate) fn new(
        slot_count: usize,
        is_mt: bool,
        filter: Option<Box<dyn MotionFilter>>,
    ) -> FallbackDispatch {
        FallbackDispatch {
            pending: PendingEvent::None,
            rel_dx: 0,
            rel_dy: 0,
            abs_x: 0,
            abs_y: 0,
            abs_seat_slot: -1,
            slot: 0,
            slots: vec![SlotRecord::default(); slot_count.max(1)].into_boxed_slice(),
            is_mt,
            keys: KeyCounter::new(),
            filter,
        }
    }

    fn process_relative(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent, time: u64) {
        match event.code {
            REL_X => {
                if self.pending != PendingEvent::RelativeMotion {
                    self.flush(ctx, time);
                }
                self.rel_dx += event.value;
                self.pending = PendingEvent::RelativeMotion;
            }
            REL_Y => {
                if self.pending != PendingEvent::RelativeMotion {
                    self.flush(ctx, time);
                }
                self.rel_dy += event.value;
                self.pending = PendingEvent::RelativeMotion;
            }
            REL_WHEEL => {
                self.flush(ctx, time);
                ctx.sink.pointer_axis(
                    ctx.device,
                    time,
                    Axis::Vertical,
                    -f64::from(event.value) * DEFAULT_AXIS_STEP_DISTANCE,
                );
            }
            REL_HWHEEL => {
                self.flush(ctx, time);
                match event.value {
                    -1 | 1 => ctx.sink.pointer_axis(
                        ctx.device,
                        time,
                        Axis::Horizontal,
                        f64::from(event.value) * DEFAULT_AXIS_STEP_DISTANCE,
                    ),
                    _ => debug!(value = event.value, "unexpected horizontal wheel step"),
                }
            }
            _ => {}
        }
    }

    fn process_absolute(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent, time: u64) {
        if self.is_mt {
            self.process_touch(ctx, event, time);
        } else {
            self.process_absolute_motion(event);
        }
    }

    fn process_touch(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent, time: u64) {
        match event.code {
            ABS_MT_SLOT => {
                self.flush(ctx, time);
                let slot = event.value.max(0) as usize;
                if slot >= self.slots.len() {
                    debug!(slot, "slot index out of range");
                }
                self.slot = slot.min(self.slots.len() - 1);
            }
            ABS_MT_TRACKING_ID => {
                if self.pending != PendingEvent::None && self.pending != PendingEvent::MtMotion {
                    self.flush(ctx, time);
                }
                self.pending = if event.value >= 0 {
                    PendingEvent::MtDown
                } else {
                    PendingEvent::MtUp
                };
            }
            ABS_MT_POSITION_X => {
                self.slots[self.slot].x = event.value;
                if self.pending == PendingEvent::None {
                    self.pending = PendingEvent::MtMotion;
                }
            }
            ABS_MT_POSITION_Y => {
                self.slots[self.slot].y = event.value;
                if self.pending == PendingEvent::None {
                    self.pending = PendingEvent::MtMotion;
                }
            }
            _ => {}
        }
    }

    fn process_absolute_motion(&mut self, event: &RawEvent) {
        match event.code {
            ABS_X => {
                self.abs_x = event.value;
                if self.pending == PendingEvent::None {
                    self.pending = PendingEvent::AbsoluteMotion;
                }
            }
            ABS_Y => {
                self.abs_y = event.value;
                if self.pending == PendingEvent::None {
                    self.pending = PendingEvent::AbsoluteMotion;
                }
            }
            _ => {}
        }
    }

    /// `BTN_TOUCH` on a single-touch device is the touch boundary. An
    /// in-progress `AbsoluteMotion` holds the contact position and is
    /// folded into the touch transition instead of being flushed.
    fn process_touch_button(&mut self, ctx: &mut DispatchContext<'_>, time: u64, value: i32) {
        if self.pending != PendingEvent::None && self.pending != PendingEvent::AbsoluteMotion {
            self.flush(ctx, time);
        }
        self.pending = if value != 0 {
            PendingEvent::TouchDown
        } else {
            PendingEvent::TouchUp
        };
    }

    fn process_key(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent, time: u64) {
        // kernel autorepeat, not delivered
        if event.value == 2 {
            return;
        }
        if event.code == BTN_TOUCH && !self.is_mt {
            self.process_touch_button(ctx, time, event.value);
            return;
        }

        self.flush(ctx, time);

        let pressed = event.value != 0;
        if !pressed && !self.keys.is_down(event.code) {
            debug!(code = event.code, "dropping release of a key that is not down");
            return;
        }
        let edge = if pressed {
            self.keys.press(event.code)
        } else {
            self.keys.release(event.code)
        };
        if !edge {
            return;
        }

        match key_type(event.code) {
            KeyType::None => {}
            KeyType::Key => ctx.sink.keyboard_key(
                ctx.device,
                time,
                event.code as u32,
                if pressed {
                    KeyState::Pressed
                } else {
                    KeyState::Released
                },
            ),
            KeyType::Button => ctx.sink.pointer_button(
                ctx.device,
                time,
                event.code as u32,
                if pressed {
                    ButtonState::Pressed
                } else {
                    ButtonState::Released
                },
            ),
        }
    }

    fn process_sync(&mut self, ctx: &mut DispatchContext<'_>, time: u64) {
        let need_frame = self.need_touch_frame(ctx.caps);
        self.flush(ctx, time);
        if need_frame {
            ctx.sink.touch_frame(ctx.device, time);
        }
    }

    /// Whether the current frame ends a set of touch points and must be
    /// sealed with a touch-frame notification.
    fn need_touch_frame(&self, caps: DeviceCapability) -> bool {
        caps.contains(DeviceCapability::TOUCH)
            && matches!(
                self.pending,
                PendingEvent::MtDown
                    | PendingEvent::MtMotion
                    | PendingEvent::MtUp
                    | PendingEvent::TouchDown
                    | PendingEvent::TouchUp
                    | PendingEvent::AbsoluteMotion
            )
    }

    /// Turns the pending event into its outbound notification.
    #[profiling::function]
    fn flush(&mut self, ctx: &mut DispatchContext<'_>, time: u64) {
        let pending = std::mem::replace(&mut self.pending, PendingEvent::None);
        match pending {
            PendingEvent::None => {}
            PendingEvent::RelativeMotion => {
                let mut motion = MotionDelta {
                    dx: self.rel_dx as f64,
                    dy: self.rel_dy as f64,
                };
                self.rel_dx = 0;
                self.rel_dy = 0;
                if !ctx.caps.contains(DeviceCapability::POINTER) {
                    return;
                }
                if let Some(filter) = self.filter.as_mut() {
                    filter.apply(&mut motion, time);
                }
                if !motion.is_zero() {
                    ctx.sink.pointer_motion(ctx.device, time, motion.dx, motion.dy);
                }
            }
            PendingEvent::AbsoluteMotion => {
                let (x, y) = transform(ctx, self.abs_x, self.abs_y);
                if ctx.caps.contains(DeviceCapability::TOUCH) {
                    if self.abs_seat_slot != -1 {
                        ctx.sink.touch_motion(
                            ctx.device,
                            time,
                            None,
                            self.abs_seat_slot as u32,
                            x,
                            y,
                        );
                    }
                } else if ctx.caps.contains(DeviceCapability::POINTER) {
                    ctx.sink.pointer_motion_absolute(ctx.device, time, x, y);
                }
            }
            PendingEvent::MtDown => {
                if !ctx.caps.contains(DeviceCapability::TOUCH) {
                    return;
                }
                let slot = self.slot;
                if self.slots[slot].seat_slot != -1 {
                    warn!(slot, "driver sent multi-touch down on an already active slot");
                    return;
                }
                let seat_slot = ctx.seat.allocate_slot();
                self.slots[slot].seat_slot = seat_slot.map(|s| s as i32).unwrap_or(-1);
                let Some(seat_slot) = seat_slot else {
                    // seat is saturated, the touch is tracked but not reported
                    return;
                };
                let (x, y) = transform(ctx, self.slots[slot].x, self.slots[slot].y);
                ctx.sink
                    .touch_down(ctx.device, time, Some(slot as u32), seat_slot, x, y);
            }
            PendingEvent::MtMotion => {
                if !ctx.caps.contains(DeviceCapability::TOUCH) {
                    return;
                }
                let record = self.slots[self.slot];
                if record.seat_slot == -1 {
                    return;
                }
                let (x, y) = transform(ctx, record.x, record.y);
                ctx.sink.touch_motion(
                    ctx.device,
                    time,
                    Some(self.slot as u32),
                    record.seat_slot as u32,
                    x,
                    y,
                );
            }
            PendingEvent::MtUp => {
                if !ctx.caps.contains(DeviceCapability::TOUCH) {
                    return;
                }
                let seat_slot = self.slots[self.slot].seat_slot;
                self.slots[self.slot].seat_slot = -1;
                if seat_slot == -1 {
                    return;
                }
                ctx.seat.release_slot(seat_slot as u32);
                ctx.sink
                    .touch_up(ctx.device, time, Some(self.slot as u32), seat_slot as u32);
            }
            PendingEvent::TouchDown => {
                if !ctx.caps.contains(DeviceCapability::TOUCH) {
                    return;
                }
                if self.abs_seat_slot != -1 {
                    warn!("driver sent a touch down while the contact is already down");
                    return;
                }
                let seat_slot = ctx.seat.allocate_slot();
                self.abs_seat_slot = seat_slot.map(|s| s as i32).unwrap_or(-1);
                let Some(seat_slot) = seat_slot else {
                    return;
                };
                let (x, y) = transform(ctx, self.abs_x, self.abs_y);
                ctx.sink.touch_down(ctx.device, time, None, seat_slot, x, y);
            }
            PendingEvent::TouchUp => {
                if !ctx.caps.contains(DeviceCapability::TOUCH) {
                    return;
                }
                let seat_slot = self.abs_seat_slot;
                self.abs_seat_slot = -1;
                if seat_slot == -1 {
                    return;
                }
                ctx.seat.release_slot(seat_slot as u32);
                ctx.sink.touch_up(ctx.device, time, None, seat_slot as u32);
            }
        }
    }
}

impl DeviceDispatch for FallbackDispatch {
    #[profiling::function]
    fn process(&mut self, ctx: &mut DispatchContext<'_>, event: &RawEvent) {
        let time = event.time_ms();
        match event.kind {
            EV_REL => self.process_relative(ctx, event, time),
            EV_ABS => self.process_absolute(ctx, event, time),
            EV_KEY => self.process_key(ctx, event, time),
            EV_SYN if event.code == SYN_REPORT => self.process_sync(ctx, time),
            _ => {}
        }
    }

    fn remove(&mut self, ctx: &mut DispatchContext<'_>, time: u64) {
        let pressed: Vec<u16> = self.keys.pressed_codes().collect();
        for code in pressed {
            match key_type(code) {
                KeyType::None => {}
                KeyType::Key => {
                    ctx.sink
                        .keyboard_key(ctx.device, time, code as u32, KeyState::Released)
                }
                KeyType::Button => {
                    ctx.sink
                        .pointer_button(ctx.device, time, code as u32, ButtonState::Released)
                }
            }
        }
        self.keys.clear();

        // return the seat slots of touches this device still holds
        for record in self.slots.iter_mut() {
            if record.seat_slot != -1 {
                ctx.seat.release_slot(record.seat_slot as u32);
                record.seat_slot = -1;
            }
        }
        if self.abs_seat_slot != -1 {
            ctx.seat.release_slot(self.abs_seat_slot as u32);
            self.abs_seat_slot = -1;
        }
    }
}

fn transform(ctx: &DispatchContext<'_>, x: i32, y: i32) -> (f64, f64) {
    match ctx.calibration {
        Some(calibration) => {
            let (x, y) = calibration.transform(x, y);
            (x as f64, y as f64)
        }
        None => (x as f64, y as f64),
    }
}
