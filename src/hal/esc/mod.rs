mod rcesc;
pub use rcesc::{Builder, RcEsc};

/// Electronic speed controller driven by pulse width.
pub trait Esc: Send {
    /// Arm this ESC.
    fn arm(&mut self);

    /// Output a pulse width in microseconds.
    fn output(&mut self, pulse_us: f32);
}

impl<T: Esc + ?Sized> Esc for Box<T> {
    fn arm(&mut self) {
        (**self).arm()
    }

    fn output(&mut self, pulse_us: f32) {
        (**self).output(pulse_us)
    }
}
