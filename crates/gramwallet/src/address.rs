//! Ledger account addresses.
//!
//! Two textual forms are accepted: raw (`<workchain>:<64 hex chars>`) and user-friendly
//! (48 base64 or base64url characters encoding flags, workchain, hash and a CRC16 checksum).
//! Two addresses are the same account when workchain and hash match, regardless of the
//! form or flags they were written with.

use base64::Engine as _;
use std::fmt;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;
const FRIENDLY_LEN: usize = 48;
const FRIENDLY_BYTES: usize = 36;

#[derive(Debug, Clone, Copy)]
pub struct Address {
    workchain: i8,
    hash: [u8; 32],
    bounceable: bool,
    test_only: bool,
}

/// Rendering flags for the user-friendly form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyFormat {
    pub url_safe: bool,
    pub bounceable: bool,
}

impl FriendlyFormat {
    /// The form the wallet stores and displays its own address in.
    pub const CANONICAL: Self = Self {
        url_safe: true,
        bounceable: true,
    };

    /// The form used when sending to an account whose contract is not active.
    pub const NON_BOUNCEABLE: Self = Self {
        url_safe: true,
        bounceable: false,
    };
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

impl Address {
    pub const fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self {
            workchain,
            hash,
            bounceable: true,
            test_only: false,
        }
    }

    pub fn parse(s: &str) -> eyre::Result<Self> {
        let s = s.trim();
        if let Some((wc, hex_hash)) = s.split_once(':') {
            return Self::parse_raw(wc, hex_hash);
        }
        Self::parse_friendly(s)
    }

    /// Address-format validation used by the send guards.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    fn parse_raw(wc: &str, hex_hash: &str) -> eyre::Result<Self> {
        let workchain: i8 = wc
            .parse()
            .map_err(|e| eyre::eyre!("invalid workchain {wc:?}: {e}"))?;
        let bytes = hex::decode(hex_hash).map_err(|e| eyre::eyre!("invalid address hash: {e}"))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_e: Vec<u8>| eyre::eyre!("address hash must be 32 bytes"))?;
        Ok(Self::new(workchain, hash))
    }

    fn parse_friendly(s: &str) -> eyre::Result<Self> {
        if s.len() != FRIENDLY_LEN {
            eyre::bail!("user-friendly address must be {FRIENDLY_LEN} characters");
        }
        let std_form = s.replace('-', "+").replace('_', "/");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(std_form)
            .map_err(|e| eyre::eyre!("invalid address encoding: {e}"))?;
        let bytes: [u8; FRIENDLY_BYTES] = bytes
            .try_into()
            .map_err(|_e: Vec<u8>| eyre::eyre!("user-friendly address must decode to 36 bytes"))?;

        let (body, checksum) = bytes.split_at(34);
        let expected = crc16_xmodem(body).to_be_bytes();
        if checksum != expected {
            eyre::bail!("address checksum mismatch");
        }

        let mut tag = body[0];
        let test_only = tag & TAG_TEST_ONLY != 0;
        tag &= !TAG_TEST_ONLY;
        let bounceable = match tag {
            TAG_BOUNCEABLE => true,
            TAG_NON_BOUNCEABLE => false,
            other => eyre::bail!("unknown address tag 0x{other:02x}"),
        };
        let workchain = i8::from_be_bytes([body[1]]);
        let mut hash = [0_u8; 32];
        hash.copy_from_slice(&body[2..34]);
        Ok(Self {
            workchain,
            hash,
            bounceable,
            test_only,
        })
    }

    pub const fn workchain(&self) -> i8 {
        self.workchain
    }

    pub const fn is_bounceable(&self) -> bool {
        self.bounceable
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    pub fn to_friendly(&self, fmt: FriendlyFormat) -> String {
        let mut tag = if fmt.bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if self.test_only {
            tag |= TAG_TEST_ONLY;
        }
        let mut bytes = Vec::with_capacity(FRIENDLY_BYTES);
        bytes.push(tag);
        bytes.extend_from_slice(&self.workchain.to_be_bytes());
        bytes.extend_from_slice(&self.hash);
        let crc = crc16_xmodem(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        if fmt.url_safe {
            base64::engine::general_purpose::URL_SAFE.encode(bytes)
        } else {
            base64::engine::general_purpose::STANDARD.encode(bytes)
        }
    }

    pub fn canonical(&self) -> String {
        self.to_friendly(FriendlyFormat::CANONICAL)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.workchain == other.workchain && self.hash == other.hash
    }
}

impl Eq for Address {}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Compare two address strings as accounts. Unparseable strings never match.
pub fn same_account(a: &str, b: &str) -> bool {
    match (Address::parse(a), Address::parse(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
