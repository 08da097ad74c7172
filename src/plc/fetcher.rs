//! Stateless domain reads: translates device reads into a single
//! snapshot record. Every field read substitutes a typed default on
//! transport failure so one bad register never loses the whole record.

use super::{PlcResult, Transport};
use crate::master::Master;
use crate::settings::DeviceMap;
use crate::snapshot::{remain_minutes, remain_pallet, Snapshot};
use chrono::{Local, NaiveDate, NaiveDateTime};
use log::warn;

/// Words holding the alarm message (2 ASCII chars per word).
const ALARM_MSG_WORDS: u16 = 10;
/// Words holding the packed-BCD timestamp.
const TIMESTAMP_WORDS: u16 = 3;

/// A snapshot plus the number of field reads that fell back to their
/// defaults; the service layer counts a fetch with failed reads as a
/// non-success.
pub struct FetchedSnapshot {
    pub snapshot: Snapshot,
    pub read_failures: u32,
}

struct FieldReads<'a> {
    transport: &'a dyn Transport,
    failures: u32,
}

impl<'a> FieldReads<'a> {
    fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            failures: 0,
        }
    }

    fn word(&mut self, device: &str, field: &str, default: u16) -> u16 {
        match self.transport.read_words(device, 1) {
            Ok(data) => data[0],
            Err(e) => {
                warn!("failed to get {} from PLC: {}, using default {}", field, e, default);
                self.failures += 1;
                default
            }
        }
    }

    fn dword_nonneg(&mut self, device: &str, field: &str) -> u32 {
        match self.transport.read_dwords(device, 1) {
            Ok(data) => u32::try_from(data[0]).unwrap_or(0),
            Err(e) => {
                warn!("failed to get {} from PLC: {}, using default 0", field, e);
                self.failures += 1;
                0
            }
        }
    }

    fn bit(&mut self, device: &str, field: &str) -> bool {
        match self.transport.read_bits(device, 1) {
            Ok(data) => data[0],
            Err(e) => {
                warn!("failed to get {} from PLC: {}, using default false", field, e);
                self.failures += 1;
                false
            }
        }
    }

    fn alarm_msg(&mut self, device: &str) -> String {
        match self.transport.read_words(device, ALARM_MSG_WORDS) {
            Ok(words) => decode_alarm_text(&words),
            Err(e) => {
                warn!("failed to get alarm message from PLC: {}, using empty string", e);
                self.failures += 1;
                String::new()
            }
        }
    }

    fn timestamp(&mut self, device: &str) -> NaiveDateTime {
        match read_timestamp(self.transport, device) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("failed to get timestamp from PLC: {}, using system time", e);
                self.failures += 1;
                Local::now().naive_local()
            }
        }
    }
}

fn bcd_byte(b: u8) -> Option<u32> {
    let hi = u32::from(b >> 4);
    let lo = u32::from(b & 0x0F);
    (hi <= 9 && lo <= 9).then_some(hi * 10 + lo)
}

/// Decodes the packed-BCD clock words: word 1 holds year-2000 and month,
/// word 2 day and hour, word 3 minute and second, high byte first.
/// `[0x2511, 0x1314, 0x3045]` -> 2025-11-13 14:30:45.
pub fn decode_bcd_timestamp(words: &[u16]) -> Option<NaiveDateTime> {
    if words.len() != TIMESTAMP_WORDS as usize {
        return None;
    }
    let year = 2000 + bcd_byte((words[0] >> 8) as u8)?;
    let month = bcd_byte((words[0] & 0xFF) as u8)?;
    let day = bcd_byte((words[1] >> 8) as u8)?;
    let hour = bcd_byte((words[1] & 0xFF) as u8)?;
    let minute = bcd_byte((words[2] >> 8) as u8)?;
    let second = bcd_byte((words[2] & 0xFF) as u8)?;
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, second)
}

/// Decodes the alarm text: two ASCII bytes per word, high byte first,
/// trailing NULs trimmed.
pub fn decode_alarm_text(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.push((word >> 8) as u8);
        bytes.push((word & 0xFF) as u8);
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Strict PLC clock read: transport errors propagate, a malformed BCD
/// payload falls back to the system clock.
pub fn read_timestamp(transport: &dyn Transport, device: &str) -> PlcResult<NaiveDateTime> {
    let words = transport.read_words(device, TIMESTAMP_WORDS)?;
    Ok(decode_bcd_timestamp(&words).unwrap_or_else(|| {
        warn!("malformed BCD timestamp {:?}, using system time", words);
        Local::now().naive_local()
    }))
}

/// Assembles one snapshot from the device map, resolving the
/// production-type master and deriving the remaining-work figures.
pub fn fetch_snapshot(
    transport: &dyn Transport,
    devices: &DeviceMap,
    master: &Master,
) -> FetchedSnapshot {
    let mut reads = FieldReads::new(transport);
    let raw_type = reads.word(&devices.production_type, "production type", 0);
    let production_type = if raw_type > 15 {
        warn!("invalid production type {} from PLC, defaulting to 0", raw_type);
        0
    } else {
        raw_type
    };

    let plan = reads.dword_nonneg(&devices.plan, "production plan");
    let actual = reads.dword_nonneg(&devices.actual, "production actual");
    let in_operating = reads.bit(&devices.in_operating, "in_operating flag");
    let alarm = reads.bit(&devices.alarm_flag, "alarm flag");
    let alarm_msg = reads.alarm_msg(&devices.alarm_msg);

    let config = match master.get(production_type) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}", e);
            return FetchedSnapshot {
                snapshot: Snapshot {
                    line_name: master.line_name().to_owned(),
                    production_type,
                    production_name: "UNKNOWN".to_owned(),
                    plan,
                    actual,
                    in_operating,
                    remain_min: 0,
                    remain_pallet: 0.0,
                    fully: 1,
                    alarm: true,
                    alarm_msg: format!("production type config error: type={}", production_type),
                    timestamp: Local::now().naive_local(),
                },
                read_failures: reads.failures,
            };
        }
    };

    let remain_min = remain_minutes(plan, actual, config);
    let pallet = remain_pallet(plan, actual, config);
    let fully = config.fully;
    let production_name = config.name.clone();
    let timestamp = reads.timestamp(&devices.time);

    FetchedSnapshot {
        snapshot: Snapshot {
            line_name: master.line_name().to_owned(),
            production_type,
            production_name,
            plan,
            actual,
            in_operating,
            alarm,
            alarm_msg,
            remain_min,
            remain_pallet: pallet,
            fully,
            timestamp,
        },
        read_failures: reads.failures,
    }
}
