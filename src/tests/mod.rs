use anyhow::{format_err, Result};

mod opf;
mod pf;

/// Fails unless `got` is within `tol` of `want`, absolutely or relative
/// to the magnitude of `want`.
pub(crate) fn assert_close(what: &str, got: f64, want: f64, tol: f64) -> Result<()> {
    let err = (got - want).abs();
    if err <= tol || err <= tol * want.abs() {
        Ok(())
    } else {
        Err(format_err!("{}: got {}, want {} (tol {:e})", what, got, want, tol))
    }
}
