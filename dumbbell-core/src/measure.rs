use anyhow::{bail, ensure};
use logos::{Lexer, Logos};
use std::{fmt, str::FromStr};

/// A link's transmission rate in bits per second.
///
/// Link rates use decimal multiples (`10mbps` is 10^7 bits per second),
/// matching the convention of the point-to-point link parameters this
/// harness configures.
///
/// # Example
///
/// ```
/// # use dumbbell_core::Bandwidth;
/// let bw: Bandwidth = "10mbps".parse().unwrap();
/// assert_eq!(bw.bits_per_sec(), 10_000_000);
/// assert_eq!(bw.bytes_per_sec(), 1_250_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth(
    /// bits per seconds
    u64,
);

impl Bandwidth {
    pub const fn from_bits_per_sec(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits_per_sec(self) -> u64 {
        self.0
    }

    /// the rate expressed in bytes per second, the unit the
    /// bandwidth-delay product is computed in
    #[inline]
    pub const fn bytes_per_sec(self) -> u64 {
        self.0 / 8
    }
}

const K: u64 = 1_000;
const M: u64 = 1_000_000;
const G: u64 = 1_000_000_000;

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        let k = self.0 / K;
        let m = self.0 / M;
        let g = self.0 / G;

        let v_r = self.0 % K;
        let k_r = self.0 % M;
        let m_r = self.0 % G;

        if v < K || v_r != 0 {
            write!(f, "{v}bps")
        } else if v < M || k_r != 0 {
            write!(f, "{k}kbps")
        } else if v < G || m_r != 0 {
            write!(f, "{m}mbps")
        } else {
            write!(f, "{g}gbps")
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")] // Ignore this regex pattern between tokens
enum BandwidthToken {
    #[regex("bps")]
    Bps,
    #[regex("kbps")]
    Kbps,
    #[regex("mbps")]
    Mbps,
    #[regex("gbps")]
    Gbps,

    #[regex("[0-9]+")]
    Value,
}

impl FromStr for Bandwidth {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, BandwidthToken>::new(s);

        let Some(Ok(BandwidthToken::Value)) = lex.next() else {
            bail!("Expecting to parse a number")
        };
        let number: u64 = lex.slice().parse()?;
        let Some(Ok(token)) = lex.next() else {
            bail!("Expecting to parse a unit")
        };
        let bps = match token {
            BandwidthToken::Bps => number,
            BandwidthToken::Kbps => number * K,
            BandwidthToken::Mbps => number * M,
            BandwidthToken::Gbps => number * G,
            BandwidthToken::Value => bail!("Expecting to parse a unit (bps, kbps, ...)"),
        };

        ensure!(
            lex.next().is_none(),
            "Not expecting any other tokens to parse a bandwidth"
        );

        Ok(Self(bps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bandwidth() {
        macro_rules! assert_bandwidth {
            ($string:literal == $value:expr) => {
                assert_eq!($string.parse::<Bandwidth>().unwrap(), Bandwidth($value));
            };
        }

        assert_bandwidth!("0bps" == 0);
        assert_bandwidth!("42bps" == 42);
        assert_bandwidth!("42kbps" == 42 * K);
        assert_bandwidth!("10mbps" == 10 * M);
        assert_bandwidth!("1gbps" == G);
    }

    #[test]
    fn print_bandwidth() {
        macro_rules! assert_bandwidth {
            (($bandwidth:expr) == $string:literal) => {
                assert_eq!(Bandwidth($bandwidth).to_string(), $string);
            };
        }

        assert_bandwidth!((0) == "0bps");
        assert_bandwidth!((42) == "42bps");
        assert_bandwidth!((42 * K) == "42kbps");
        assert_bandwidth!((10 * M) == "10mbps");
        assert_bandwidth!((100 * M) == "100mbps");
        assert_bandwidth!((42 * G) == "42gbps");

        assert_bandwidth!((12_345) == "12345bps");
    }

    #[test]
    fn parse_invalid_strings() {
        assert!("42".parse::<Bandwidth>().is_err()); // no unit
        assert!("mbps".parse::<Bandwidth>().is_err()); // no number
        assert!("".parse::<Bandwidth>().is_err()); // empty
        assert!("42mbps extra".parse::<Bandwidth>().is_err()); // trailing token
    }

    #[test]
    fn bytes_per_sec() {
        let bw: Bandwidth = "100mbps".parse().unwrap();
        assert_eq!(bw.bytes_per_sec(), 12_500_000);
    }
}
