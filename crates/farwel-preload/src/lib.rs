//! `LD_PRELOAD` entry point for farwel.
//!
//! Loading `libfarwel.so` into a process replaces its `open`, `read`,
//! `stat` and friends with shims that consult the routing table built from
//! `FRWL_CONFIG_FILE`. Anything the table does not claim reaches the next
//! definition of the symbol (normally libc) unchanged.
//!
//! ```bash
//! FRWL_CONFIG_FILE=farwel.json LD_PRELOAD=target/release/libfarwel.so ls /data
//! ```
//!
//! Startup is fatal when the configuration is missing or unreadable: the
//! process prints the reason and exits before `main` runs.

#![cfg(target_os = "linux")]

mod guard;
mod shim;

use std::sync::{Arc, OnceLock};

use farwel_kernel::real::set_errno;
use farwel_kernel::{Interceptor, LibcOs, RealOs};

use guard::Reentry;

static REAL: OnceLock<Arc<LibcOs>> = OnceLock::new();
static CONTEXT: OnceLock<Interceptor> = OnceLock::new();

/// The next definitions of the wrapped symbols.
pub(crate) fn real() -> &'static LibcOs {
    REAL.get_or_init(|| Arc::new(LibcOs::resolve()))
}

fn real_shared() -> Arc<dyn RealOs> {
    REAL.get_or_init(|| Arc::new(LibcOs::resolve())).clone()
}

/// A shim call that may use the routing table.
pub(crate) struct Entered {
    context: &'static Interceptor,
    _reentry: Reentry,
}

/// `None` when the interceptor is not ready yet or this thread is already
/// inside a shim; the caller then goes straight to libc.
pub(crate) fn enter() -> Option<Entered> {
    let reentry = Reentry::enter()?;
    let context = CONTEXT.get()?;
    Some(Entered {
        context,
        _reentry: reentry,
    })
}

impl Entered {
    /// Run `f`, reporting a panic below it as `EIO` with `failed` as the
    /// result.
    pub(crate) fn run<R>(&self, failed: R, f: impl FnOnce(&Interceptor) -> R) -> R {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self.context))) {
            Ok(result) => result,
            Err(_) => {
                set_errno(libc::EIO);
                failed
            }
        }
    }
}

#[cfg_attr(test, allow(dead_code))]
extern "C" fn startup() {
    let Some(_reentry) = Reentry::enter() else {
        return;
    };
    match Interceptor::from_env(real_shared()) {
        Ok(context) => {
            tracing::info!(
                connectors = context.dispatcher().connectors().len(),
                routes = context.dispatcher().routes().len(),
                "farwel ready"
            );
            let _ = CONTEXT.set(context);
        }
        Err(e) => {
            eprintln!("farwel: {e}");
            std::process::exit(-1);
        }
    }
}

#[cfg(not(test))]
#[used]
#[unsafe(link_section = ".init_array")]
static STARTUP: extern "C" fn() = startup;
