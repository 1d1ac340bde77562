mod guard;
mod panic;

pub use guard::CleanupGuard;
pub use panic::PanicError;
