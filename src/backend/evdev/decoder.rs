//! Decoding of the raw evdev byte stream into typed events.
//!
//! The pipeline is written against the [`EventDecoder`] trait rather than a
//! concrete reader, for two reasons: recovery helpers (such as a state-aware
//! resync stream after a queue overflow, or a slot converter bridging the
//! legacy unslotted multi-touch protocol) are supplied by wrapping a decoder
//! in another one, and tests drive the state machine with scripted decoders
//! instead of device nodes.
//!
//! [`FdDecoder`] is the stock implementation reading `struct input_event`
//! records from an evdev character device.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem::size_of;
use std::os::unix::io::{AsRawFd, BorrowedFd, OwnedFd};

use rustix::io::Errno;
use tracing::debug;

use super::codes::{ABS_MAX, ABS_MT_SLOT, EV_ABS, EV_KEY, EV_LED, EV_REL, EV_SYN, KEY_CNT, LED_MAX, REL_MAX, SYN_DROPPED};

/// Range and resolution of an absolute axis, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsInfo {
    /// Smallest reportable value.
    pub minimum: i32,
    /// Largest reportable value.
    pub maximum: i32,
    /// Fuzz value used for input filtering by the kernel.
    pub fuzz: i32,
    /// Size of the flat dead zone around zero.
    pub flat: i32,
    /// Resolution in units/mm, or 0 if the device does not report one.
    pub resolution: i32,
}

/// One decoded kernel input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Seconds part of the event timestamp.
    pub time_sec: i64,
    /// Microseconds part of the event timestamp.
    pub time_usec: i64,
    /// Event type (`EV_*`).
    pub kind: u16,
    /// Event code within the type (`REL_*`, `ABS_*`, ...).
    pub code: u16,
    /// Event value.
    pub value: i32,
}

impl RawEvent {
    /// The event timestamp in milliseconds.
    pub fn time_ms(&self) -> u64 {
        self.time_sec as u64 * 1000 + self.time_usec as u64 / 1000
    }
}

/// Which part of the stream to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The regular event stream.
    Normal,
    /// The recovery stream bringing the reader back in sync after an
    /// overflow was reported via [`ReadStatus::Resync`].
    Resync,
}

/// Result of a successful [`EventDecoder::next_event`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A regular event.
    Event(RawEvent),
    /// The kernel dropped events (`SYN_DROPPED`).
    ///
    /// The carried event is the drop marker itself; its timestamp is the
    /// time of the overflow. The caller must drain the decoder with
    /// [`ReadMode::Resync`] until it returns `None` before reading normally
    /// again.
    Resync(RawEvent),
}

/// Source of typed evdev events and device capability metadata.
pub trait EventDecoder: fmt::Debug {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Whether the device reports events of the given type at all.
    fn has_event_type(&self, kind: u16) -> bool;

    /// Whether the device reports the given code of the given type.
    fn has_event_code(&self, kind: u16, code: u16) -> bool;

    /// Axis information for an `ABS_*` code, if the device has the axis.
    fn abs_info(&self, code: u16) -> Option<AbsInfo>;

    /// Number of multi-touch slots, if the device uses slotted multi-touch.
    fn slot_count(&self) -> Option<u32> {
        None
    }

    /// Reads the next event.
    ///
    /// Returns `Ok(None)` once the stream is drained (`EAGAIN`/`EINTR`);
    /// any error is a transport failure and detaches the device.
    fn next_event(&mut self, mode: ReadMode) -> io::Result<Option<ReadStatus>>;

    /// The underlying file descriptor, if the decoder reads from one.
    fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    /// Consumes the decoder, returning the owned file descriptor so that it
    /// can be handed back to the session broker.
    fn into_fd(self: Box<Self>) -> Option<OwnedFd> {
        None
    }
}

const INPUT_EVENT_SIZE: usize = size_of::<libc::input_event>();

/// [`EventDecoder`] reading from an evdev character device.
pub struct FdDecoder {
    fd: OwnedFd,
    name: String,
    ev_bits: u64,
    key_bits: [u64; (KEY_CNT + 63) / 64],
    rel_bits: u64,
    abs_bits: u64,
    led_bits: u64,
    queue: VecDeque<RawEvent>,
}

impl fmt::Debug for FdDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdDecoder")
            .field("fd", &self.fd)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FdDecoder {
    /// Queries the device behind `fd` and wraps it in a decoder.
    ///
    /// Fails if `fd` does not answer the evdev capability ioctls. The fd is
    /// handed back on failure so the caller can return it to whoever opened
    /// it.
    pub fn new(fd: OwnedFd) -> Result<FdDecoder, (OwnedFd, io::Error)> {
        // event timestamps must come from the same clock as synthesized ones
        let _ = eviocsclockid(&fd, libc::CLOCK_MONOTONIC);

        let name = {
            let mut buf = [0u8; 256];
            match eviocgname(&fd, &mut buf) {
                Ok(len) => String::from_utf8_lossy(&buf[..len]).into_owned(),
                Err(_) => String::from("unknown"),
            }
        };

        let mut ev_buf = [0u8; 4];
        let ev_bits = match eviocgbit(&fd, 0, &mut ev_buf) {
            Ok(()) => bits_to_word(&ev_buf),
            Err(err) => return Err((fd, err)),
        };

        let mut key_buf = [0u8; KEY_CNT / 8];
        let mut rel_buf = [0u8; (REL_MAX as usize + 8) / 8];
        let mut abs_buf = [0u8; (ABS_MAX as usize + 8) / 8];
        let mut led_buf = [0u8; (LED_MAX as usize + 8) / 8];
        if ev_bits & (1 << EV_KEY) != 0 {
            let _ = eviocgbit(&fd, EV_KEY, &mut key_buf);
        }
        if ev_bits & (1 << EV_REL) != 0 {
            let _ = eviocgbit(&fd, EV_REL, &mut rel_buf);
        }
        if ev_bits & (1 << EV_ABS) != 0 {
            let _ = eviocgbit(&fd, EV_ABS, &mut abs_buf);
        }
        if ev_bits & (1 << EV_LED) != 0 {
            let _ = eviocgbit(&fd, EV_LED, &mut led_buf);
        }

        let mut key_bits = [0u64; (KEY_CNT + 63) / 64];
        bits_to_mask(&key_buf, &mut key_bits);

        Ok(FdDecoder {
            fd,
            name,
            ev_bits,
            key_bits,
            rel_bits: bits_to_word(&rel_buf),
            abs_bits: bits_to_word(&abs_buf),
            led_bits: bits_to_word(&led_buf),
            queue: VecDeque::new(),
        })
    }

    fn fill_queue(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; INPUT_EVENT_SIZE * 64];
        match rustix::io::read(&self.fd, &mut buf) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => {
                debug_assert!(n % INPUT_EVENT_SIZE == 0);
                for chunk in buf[..n].chunks_exact(INPUT_EVENT_SIZE) {
                    self.queue.push_back(parse_event(chunk));
                }
                Ok(true)
            }
            Err(err) if err == Errno::AGAIN || err == Errno::INTR => Ok(false),
            Err(err) => Err(io::Error::from(err)),
        }
    }
}

impl EventDecoder for FdDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_event_type(&self, kind: u16) -> bool {
        kind < 64 && self.ev_bits & (1 << kind) != 0
    }

    fn has_event_code(&self, kind: u16, code: u16) -> bool {
        match kind {
            EV_SYN => self.has_event_type(EV_SYN),
            EV_KEY => {
                (code as usize) < KEY_CNT
                    && self.key_bits[code as usize / 64] & (1 << (code % 64)) != 0
            }
            EV_REL => code <= REL_MAX && self.rel_bits & (1 << code) != 0,
            EV_ABS => code <= ABS_MAX && self.abs_bits & (1 << code) != 0,
            EV_LED => code <= LED_MAX && self.led_bits & (1 << code) != 0,
            _ => false,
        }
    }

    fn abs_info(&self, code: u16) -> Option<AbsInfo> {
        if !self.has_event_code(EV_ABS, code) {
            return None;
        }
        eviocgabs(&self.fd, code).ok().map(|info| AbsInfo {
            minimum: info.minimum,
            maximum: info.maximum,
            fuzz: info.fuzz,
            flat: info.flat,
            resolution: info.resolution,
        })
    }

    fn slot_count(&self) -> Option<u32> {
        let info = self.abs_info(ABS_MT_SLOT)?;
        let count = info.maximum - info.minimum + 1;
        (count > 0).then_some(count as u32)
    }

    fn next_event(&mut self, mode: ReadMode) -> io::Result<Option<ReadStatus>> {
        if mode == ReadMode::Resync {
            // No device state snapshot is kept here, so there is nothing to
            // replay: the kernel queue behind the drop marker is already
            // consistent. State-aware decoders wrap this one and synthesize
            // the missing transitions instead.
            return Ok(None);
        }
        if self.queue.is_empty() && !self.fill_queue()? {
            return Ok(None);
        }
        let Some(event) = self.queue.pop_front() else {
            return Ok(None);
        };
        if event.kind == EV_SYN && event.code == SYN_DROPPED {
            debug!(device = %self.name, "kernel event queue overflowed");
            return Ok(Some(ReadStatus::Resync(event)));
        }
        Ok(Some(ReadStatus::Event(event)))
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        use std::os::unix::io::AsFd;
        Some(self.fd.as_fd())
    }

    fn into_fd(self: Box<Self>) -> Option<OwnedFd> {
        Some(self.fd)
    }
}

fn parse_event(chunk: &[u8]) -> RawEvent {
    debug_assert_eq!(chunk.len(), INPUT_EVENT_SIZE);
    let mut ev: libc::input_event = unsafe { std::mem::zeroed() };
    // Safety: input_event is plain old data and chunk holds exactly one record.
    unsafe {
        std::ptr::copy_nonoverlapping(chunk.as_ptr(), &mut ev as *mut _ as *mut u8, INPUT_EVENT_SIZE);
    }
    RawEvent {
        time_sec: ev.time.tv_sec as i64,
        time_usec: ev.time.tv_usec as i64,
        kind: ev.type_,
        code: ev.code,
        value: ev.value,
    }
}

/// Converts a kernel bit array (byte `i`, bit `j` maps to code `i*8+j`)
/// into u64 words.
fn bits_to_mask(buf: &[u8], mask: &mut [u64]) {
    for (i, byte) in buf.iter().enumerate() {
        mask[i / 8] |= (*byte as u64) << ((i % 8) * 8);
    }
}

fn bits_to_word(buf: &[u8]) -> u64 {
    debug_assert!(buf.len() <= 8);
    let mut word = [0u64; 1];
    bits_to_mask(buf, &mut word);
    word[0]
}

const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, nr: libc::c_ulong, size: libc::c_ulong) -> libc::c_ulong {
    (dir << 30) | (size << 16) | ((b'E' as libc::c_ulong) << 8) | nr
}

fn eviocsclockid(fd: &OwnedFd, clock: libc::c_int) -> io::Result<()> {
    let req = ioc(IOC_WRITE, 0xa0, size_of::<libc::c_int>() as libc::c_ulong);
    // Safety: the kernel reads exactly one c_int.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), req as _, &clock) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn eviocgname(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let req = ioc(IOC_READ, 0x06, buf.len() as libc::c_ulong);
    // Safety: the kernel writes at most `buf.len()` bytes.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), req as _, buf.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    let len = buf[..rc as usize].iter().position(|b| *b == 0).unwrap_or(rc as usize);
    Ok(len)
}

fn eviocgbit(fd: &OwnedFd, kind: u16, buf: &mut [u8]) -> io::Result<()> {
    let req = ioc(IOC_READ, 0x20 + kind as libc::c_ulong, buf.len() as libc::c_ulong);
    // Safety: the kernel writes at most `buf.len()` bytes.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), req as _, buf.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn eviocgabs(fd: &OwnedFd, code: u16) -> io::Result<libc::input_absinfo> {
    let mut info: libc::input_absinfo = unsafe { std::mem::zeroed() };
    let req = ioc(
        IOC_READ,
        0x40 + code as libc::c_ulong,
        size_of::<libc::input_absinfo>() as libc::c_ulong,
    );
    // Safety: the kernel fills exactly one input_absinfo.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), req as _, &mut info) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_array_conversion() {
        // code 0 and code 9 set
        assert_eq!(bits_to_word(&[0b0000_0001, 0b0000_0010]), (1 << 0) | (1 << 9));

        // code 100 set in a key-sized array
        let mut buf = [0u8; KEY_CNT / 8];
        buf[100 / 8] = 1 << (100 % 8);
        let mut mask = [0u64; (KEY_CNT + 63) / 64];
        bits_to_mask(&buf, &mut mask);
        assert_eq!(mask[100 / 64], 1u64 << (100 % 64));
    }

    #[test]
    fn raw_event_time() {
        let ev = RawEvent {
            time_sec: 2,
            time_usec: 1500,
            kind: EV_SYN,
            code: 0,
            value: 0,
        };
        assert_eq!(ev.time_ms(), 2001);
    }
}
