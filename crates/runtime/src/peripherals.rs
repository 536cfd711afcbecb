//! Emulated MCU peripherals
//!
//! UART, GPIO, a one-shot/periodic timer, the interrupt-enable flag, and the
//! delay counters all live behind one [`Peripherals`] struct. Intrinsic calls
//! are dispatched by name through [`Peripherals::call`]; the interpreter
//! checks arity against [`intrinsic_arity`] before dispatching. Hosts (tests,
//! emulator frontends) rebind the UART sink and feed the UART source through
//! the public methods and inspect any state afterwards.

use std::collections::VecDeque;
use std::io::Write;

use tracing::debug;

/// Where UART output bytes go.
pub enum UartSink {
    /// Process standard output (the default)
    Stdout,
    /// In-memory capture for hosts and tests
    Capture(Vec<u8>),
    /// Any writer the host supplies
    Writer(Box<dyn Write + Send>),
}

/// Emulated UART. Status bit 0 is "receive data available", bit 1 is
/// "transmit ready" (always set; writes never block).
pub struct Uart {
    pub baud: u32,
    sink: UartSink,
    source: VecDeque<u8>,
}

pub const UART_STATUS_RX_READY: u32 = 1 << 0;
pub const UART_STATUS_TX_READY: u32 = 1 << 1;

impl Uart {
    fn new() -> Self {
        Uart {
            baud: 9600,
            sink: UartSink::Stdout,
            source: VecDeque::new(),
        }
    }

    pub fn status(&self) -> u32 {
        let mut status = UART_STATUS_TX_READY;
        if !self.source.is_empty() {
            status |= UART_STATUS_RX_READY;
        }
        status
    }

    pub fn write_byte(&mut self, byte: u8) {
        match &mut self.sink {
            UartSink::Stdout => {
                let mut out = std::io::stdout();
                let _ = out.write_all(&[byte]);
                let _ = out.flush();
            }
            UartSink::Capture(buffer) => buffer.push(byte),
            UartSink::Writer(writer) => {
                let _ = writer.write_all(&[byte]);
            }
        }
    }

    /// Pop the next input byte; 0 when the source is empty.
    pub fn read_byte(&mut self) -> u32 {
        self.source.pop_front().map(u32::from).unwrap_or(0)
    }
}

/// 32 GPIO pins, each with a direction slot and a level slot.
#[derive(Default)]
pub struct Gpio {
    pub directions: [u32; 32],
    pub levels: [u32; 32],
}

pub const GPIO_PINS: u32 = 32;

/// Emulated timer. `value` counts up while polled; `expired` compares it
/// against `period`. Each `timer_expired` poll advances `value` by the
/// configured tick so polling loops always terminate.
pub struct Timer {
    pub mode: u32,
    pub period: u32,
    pub value: u32,
    pub running: bool,
    tick: u32,
}

impl Timer {
    fn new(tick: u32) -> Self {
        Timer {
            mode: 0,
            period: 0,
            value: 0,
            running: false,
            tick,
        }
    }

    pub fn expired_poll(&mut self) -> u32 {
        self.value = self.value.wrapping_add(self.tick.max(1));
        u32::from(self.value >= self.period)
    }
}

pub struct Peripherals {
    pub uart: Uart,
    pub gpio: Gpio,
    pub timer: Timer,
    pub interrupts_enabled: bool,
    /// Accumulated simulated delay, for host inspection
    pub delay_cycles: u64,
    pub delay_micros: u64,
}

impl Peripherals {
    pub fn new(timer_tick: u32) -> Self {
        Peripherals {
            uart: Uart::new(),
            gpio: Gpio::default(),
            timer: Timer::new(timer_tick),
            interrupts_enabled: false,
            delay_cycles: 0,
            delay_micros: 0,
        }
    }

    /// Replace the UART sink; returns the previous one so a host can restore
    /// or inspect it.
    pub fn bind_uart_sink(&mut self, sink: UartSink) -> UartSink {
        std::mem::replace(&mut self.uart.sink, sink)
    }

    /// Queue bytes on the UART receive side.
    pub fn feed_uart(&mut self, bytes: &[u8]) {
        self.uart.source.extend(bytes.iter().copied());
    }

    /// Bytes captured so far, if the sink is a capture buffer.
    pub fn uart_captured(&self) -> Option<&[u8]> {
        match &self.uart.sink {
            UartSink::Capture(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Dispatch an intrinsic by name. The caller has already checked arity
    /// via [`intrinsic_arity`]. Errors are plain strings; the interpreter
    /// attaches the call position.
    pub fn call(&mut self, name: &str, args: &[u32]) -> Result<u32, String> {
        let result = match name {
            "uart_set_baud" => {
                self.uart.baud = args[0];
                0
            }
            "uart_get_status" => self.uart.status(),
            "uart_read" => self.uart.read_byte(),
            "uart_write" => {
                self.uart.write_byte(args[0] as u8);
                0
            }
            "gpio_set" => {
                let pin = self.pin(args[0])?;
                self.gpio.directions[pin] = args[1];
                0
            }
            "gpio_read" => {
                let pin = self.pin(args[0])?;
                self.gpio.levels[pin]
            }
            "gpio_write" => {
                let pin = self.pin(args[0])?;
                self.gpio.levels[pin] = args[1];
                0
            }
            "timer_set_mode" => {
                self.timer.mode = args[0];
                0
            }
            "timer_set_period" => {
                self.timer.period = args[0];
                0
            }
            "timer_start" => {
                self.timer.running = true;
                0
            }
            "timer_stop" => {
                self.timer.running = false;
                0
            }
            "timer_reset" => {
                self.timer.value = 0;
                0
            }
            "timer_get_value" => self.timer.value,
            "timer_expired" => self.timer.expired_poll(),
            "enable_interrupts" => {
                self.interrupts_enabled = true;
                0
            }
            "disable_interrupts" => {
                self.interrupts_enabled = false;
                0
            }
            "set_bit" => args[0] | (1u32.wrapping_shl(args[1])),
            "clear_bit" => args[0] & !(1u32.wrapping_shl(args[1])),
            "toggle_bit" => args[0] ^ (1u32.wrapping_shl(args[1])),
            "get_bit" => (args[0].wrapping_shr(args[1])) & 1,
            "delay_ms" => {
                self.delay_micros += u64::from(args[0]) * 1_000;
                0
            }
            "delay_us" => {
                self.delay_micros += u64::from(args[0]);
                0
            }
            "delay_cycles" => {
                self.delay_cycles += u64::from(args[0]);
                0
            }
            other => return Err(format!("unknown intrinsic '{other}'")),
        };
        debug!(intrinsic = name, ?args, result, "peripheral call");
        Ok(result)
    }

    fn pin(&self, index: u32) -> Result<usize, String> {
        if index < GPIO_PINS {
            Ok(index as usize)
        } else {
            Err(format!("GPIO pin {index} out of range (0..{GPIO_PINS})"))
        }
    }
}

/// Arity of each peripheral intrinsic, or `None` if the name is not one.
/// Intrinsics are resolved at call time before user functions.
pub fn intrinsic_arity(name: &str) -> Option<usize> {
    let arity = match name {
        "uart_get_status" | "uart_read" => 0,
        "uart_set_baud" | "uart_write" => 1,
        "gpio_read" => 1,
        "gpio_set" | "gpio_write" => 2,
        "timer_set_mode" | "timer_set_period" => 1,
        "timer_start" | "timer_stop" | "timer_reset" | "timer_get_value" | "timer_expired" => 0,
        "enable_interrupts" | "disable_interrupts" => 0,
        "set_bit" | "clear_bit" | "toggle_bit" | "get_bit" => 2,
        "delay_ms" | "delay_us" | "delay_cycles" => 1,
        _ => return None,
    };
    Some(arity)
}
