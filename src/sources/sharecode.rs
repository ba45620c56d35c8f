//! Match share codes: `CSGO-xxxxx-xxxxx-xxxxx-xxxxx-xxxxx`.
//!
//! The 25 symbols are a base-57 number, least significant symbol first,
//! holding 18 bytes: match id, outcome id (u64 each) and a u16 token, all
//! little-endian.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

const DICTIONARY: &[u8; 57] = b"ABCDEFGHJKLMNOPQRSTUVWXYZabcdefhijkmnopqrstuvwxyz23456789";
const PREFIX: &str = "CSGO-";
const SYMBOLS: usize = 25;
const BYTES: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCode {
    pub match_id: u64,
    pub outcome_id: u64,
    pub token: u16,
}

/// What the API reports back for a decoded code. Fetching the demo itself
/// needs the game coordinator, which is out of reach here.
#[derive(Debug, Clone, Serialize)]
pub struct ShareCodeInfo {
    pub sharecode: String,
    pub match_id: String,
    pub outcome_id: String,
    pub token: u16,
    pub downloadable: bool,
    pub note: &'static str,
}

impl ShareCode {
    pub fn info(&self) -> ShareCodeInfo {
        ShareCodeInfo {
            sharecode: encode(self),
            match_id: self.match_id.to_string(),
            outcome_id: self.outcome_id.to_string(),
            token: self.token,
            downloadable: false,
            note: "matchmaking demos are served through the game coordinator; download the demo in-game and upload it",
        }
    }
}

fn symbol_value(c: u8) -> Option<u32> {
    DICTIONARY.iter().position(|&d| d == c).map(|p| p as u32)
}

pub fn decode(code: &str) -> Result<ShareCode> {
    let code = code.trim();
    let body = code.strip_prefix(PREFIX).unwrap_or(code);
    let symbols: Vec<u8> = body.bytes().filter(|&b| b != b'-').collect();
    if symbols.len() != SYMBOLS {
        bail!("expected {} symbols, got {}", SYMBOLS, symbols.len());
    }

    // big-endian base-256 accumulator
    let mut big = [0u8; BYTES];
    for &c in symbols.iter().rev() {
        let digit = symbol_value(c).ok_or_else(|| anyhow!("invalid symbol '{}'", c as char))?;
        let mut carry = digit;
        for byte in big.iter_mut().rev() {
            let v = *byte as u32 * 57 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            bail!("share code out of range");
        }
    }

    let le_u64 = |s: &[u8]| s.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Ok(ShareCode {
        match_id: le_u64(&big[0..8]),
        outcome_id: le_u64(&big[8..16]),
        token: u16::from_le_bytes([big[16], big[17]]),
    })
}

pub fn encode(code: &ShareCode) -> String {
    let mut big = [0u8; BYTES];
    big[0..8].copy_from_slice(&code.match_id.to_le_bytes());
    big[8..16].copy_from_slice(&code.outcome_id.to_le_bytes());
    big[16..18].copy_from_slice(&code.token.to_le_bytes());

    let mut symbols = Vec::with_capacity(SYMBOLS);
    for _ in 0..SYMBOLS {
        let mut rem = 0u32;
        for byte in big.iter_mut() {
            let v = (rem << 8) | *byte as u32;
            *byte = (v / 57) as u8;
            rem = v % 57;
        }
        symbols.push(DICTIONARY[rem as usize] as char);
    }

    let groups: Vec<String> = symbols.chunks(5).map(|g| g.iter().collect()).collect();
    format!("{}{}", PREFIX, groups.join("-"))
}
