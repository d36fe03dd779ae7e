use num_complex::Complex64;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Infinity norm: `max(abs(a))`, zero for an empty slice.
pub fn norm_inf(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| f64::max(m, v.abs()))
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Maps each index in `0..n` to its position in `idx`, if present.
pub fn positions(n: usize, idx: &[usize]) -> Vec<Option<usize>> {
    let mut pos = vec![None; n];
    for (k, &i) in idx.iter().enumerate() {
        pos[i] = Some(k);
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    #[test]
    fn test_positions() -> Result<()> {
        let pos = positions(4, &[3, 1]);
        if pos != vec![None, Some(1), None, Some(0)] {
            return Err(format_err!("positions {:?}", pos));
        }
        if norm_inf(&[1.0, -3.0, 2.0]) != 3.0 || norm_inf(&[]) != 0.0 {
            return Err(format_err!("infinity norm"));
        }
        Ok(())
    }
}
