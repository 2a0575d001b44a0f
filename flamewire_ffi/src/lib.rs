#![allow(clippy::missing_safety_doc)]

use std::ptr;

use flamewire_core::{ScoringCfg, UnverifiedPolicy};
use flamewire_supervisor::{
    build_window_batch, CheckStats, CycleBatch, EmaSnapshot, GatewayWindowBuilder, NodeReport,
    ScoringSupervisor,
};

/// FFI ABI version for flamewire_ffi.
///
/// Bump this when any `#[repr(C)]` struct layout or exported function signature changes.
pub const FW_FFI_VERSION: u32 = 2;

#[no_mangle]
pub extern "C" fn fw_ffi_version() -> u32 {
    FW_FFI_VERSION
}

// Snapshot wire format identification.
const SNAP_MAGIC: u32 = 0x3145_5746; // "FWE1" little-endian
const SNAP_VERSION: u32 = 1;
const SNAP_HEADER_LEN: usize = 12;

// Restore return codes.
pub const FW_RC_OK: i32 = 0;
pub const FW_RC_NULL: i32 = -1;
pub const FW_RC_HEADER: i32 = -2;
pub const FW_RC_HOTKEY_LEN: i32 = -3;
pub const FW_RC_HOTKEY_BYTES: i32 = -4;
pub const FW_RC_HOTKEY_UTF8: i32 = -5;
pub const FW_RC_EMA: i32 = -6;
pub const FW_RC_TRAILING: i32 = -7;
pub const FW_RC_MAGIC: i32 = -8;
pub const FW_RC_VERSION: i32 = -9;

/// Opaque handle exposed over FFI.
pub struct FwSupervisor {
    inner: ScoringSupervisor,
    builder: GatewayWindowBuilder,
}

/// FFI string view (UTF-8 bytes).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FwStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl FwStr {
    unsafe fn as_str(&self) -> Option<&str> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(self.ptr, self.len);
        std::str::from_utf8(bytes).ok()
    }
}

/// One node's cycle statistics.
///
/// `data_verified`: 1 passed, 0 failed, any negative value = not verified this cycle.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FwNodeReport {
    pub miner_hotkey: FwStr,
    pub node_id: FwStr,
    /// "us", "eu" or "as"
    pub region: FwStr,

    pub health_total: u32,
    pub health_passed: u32,
    pub data_verified: i8,

    /// Latency of successful calls in milliseconds (may be null).
    pub latencies_ptr: *const f64,
    pub latencies_len: usize,
}

/// Output entry.
/// Note: `hotkey` points into the string blob owned by the enclosing array.
#[repr(C)]
pub struct FwWeight {
    pub hotkey: FwStr,
    pub weight: f64,
    pub ema: f64,
}

/// Owned array returned over FFI.
#[repr(C)]
pub struct FwWeightArray {
    pub weights_ptr: *mut FwWeight,
    pub weights_len: usize,

    // backing storage for hotkeys (one blob) so the views stay valid
    pub strings_ptr: *mut u8,
    pub strings_len: usize,

    pub cycle: u64,
    pub skipped_nodes: u32,
    /// Reports that could not be decoded or were refused by the adapter.
    pub rejected_reports: u32,
    pub failed_miners: u32,
}

impl FwWeightArray {
    fn empty() -> Self {
        FwWeightArray {
            weights_ptr: ptr::null_mut(),
            weights_len: 0,
            strings_ptr: ptr::null_mut(),
            strings_len: 0,
            cycle: 0,
            skipped_nodes: 0,
            rejected_reports: 0,
            failed_miners: 0,
        }
    }
}

/// Owned byte buffer (for snapshot).
#[repr(C)]
pub struct FwBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Restore result statistics (FFI-safe).
#[repr(C)]
pub struct FwRestoreStats {
    pub applied: u32,
    pub overwritten: u32,
    pub rc: i32,
}

impl FwRestoreStats {
    fn err(rc: i32) -> Self {
        FwRestoreStats { applied: 0, overwritten: 0, rc }
    }
}

/// Scoring cfg for FFI. Probe scheduling stays on the Rust side.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FwCfg {
    pub alpha: f64,
    pub weight_budget: f64,
    pub unverified_pass: u8,
}

#[no_mangle]
pub extern "C" fn fw_cfg_default() -> FwCfg {
    let d = ScoringCfg::default();
    FwCfg {
        alpha: d.alpha,
        weight_budget: d.weight_budget,
        unverified_pass: matches!(d.unverified, UnverifiedPolicy::Pass) as u8,
    }
}

fn cfg_from_ffi(c: FwCfg) -> ScoringCfg {
    ScoringCfg {
        alpha: c.alpha,
        weight_budget: c.weight_budget,
        unverified: if c.unverified_pass != 0 {
            UnverifiedPolicy::Pass
        } else {
            UnverifiedPolicy::Fail
        },
        ..ScoringCfg::default()
    }
}

/// Create a new supervisor handle. Returns null when `cfg` is out of range.
///
/// Notes:
/// - `shards` controls internal state sharding (hotkey -> shard).
/// - This library does not spawn threads. Concurrent calls on one handle
///   serialize per-shard via internal mutexes.
#[no_mangle]
pub extern "C" fn fw_supervisor_new(shards: usize, cfg: FwCfg) -> *mut FwSupervisor {
    let cfg = cfg_from_ffi(cfg);
    if cfg.validate().is_err() {
        return ptr::null_mut();
    }
    let handle = FwSupervisor {
        inner: ScoringSupervisor::new(shards.max(1), cfg),
        builder: GatewayWindowBuilder::default(),
    };
    Box::into_raw(Box::new(handle))
}

#[no_mangle]
pub unsafe extern "C" fn fw_supervisor_free(h: *mut FwSupervisor) {
    if !h.is_null() {
        drop(Box::from_raw(h));
    }
}

unsafe fn report_from_ffi(r: &FwNodeReport) -> Option<NodeReport> {
    let latencies_ms = if r.latencies_ptr.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(r.latencies_ptr, r.latencies_len).to_vec()
    };
    Some(NodeReport {
        miner_hotkey: r.miner_hotkey.as_str()?.to_string(),
        node_id: r.node_id.as_str()?.to_string(),
        region: r.region.as_str()?.to_string(),
        health: CheckStats::new(r.health_total, r.health_passed),
        data_verified: (r.data_verified >= 0).then_some(r.data_verified != 0),
        latencies_ms,
    })
}

/// Score one cycle. Returns an owned weight array (must be freed with `fw_weights_free`).
///
/// Reports that do not decode (bad UTF-8, unknown region, passed > total) are
/// skipped and counted in `rejected_reports`. An empty batch still publishes weights from the stored EMAs.
#[no_mangle]
pub unsafe extern "C" fn fw_score_cycle(
    h: *mut FwSupervisor,
    nodes_ptr: *const FwNodeReport,
    nodes_len: usize,
) -> FwWeightArray {
    if h.is_null() {
        return FwWeightArray::empty();
    }
    let handle = &*h;

    let reports: &[FwNodeReport] = if nodes_ptr.is_null() || nodes_len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(nodes_ptr, nodes_len)
    };
    let decoded: Vec<NodeReport> = reports.iter().filter_map(|r| report_from_ffi(r)).collect();
    let undecodable = reports.len() - decoded.len();
    let (windows, rejected) = build_window_batch(&handle.builder, &decoded);

    let report = handle.inner.score_cycle(&CycleBatch { windows, census: None });

    let mut arr = FwWeightArray::empty();
    arr.cycle = report.cycle;
    arr.skipped_nodes = report.skipped_nodes.len() as u32;
    arr.rejected_reports = (undecodable + rejected.len()) as u32;
    arr.failed_miners = report.failed_miners.len() as u32;

    let Some(weights) = report.weights else {
        return arr;
    };

    // Build a single backing blob for hotkeys
    let mut strings: Vec<u8> = Vec::new();
    let mut out: Vec<FwWeight> = Vec::with_capacity(weights.entries.len());
    let mut offsets: Vec<usize> = Vec::with_capacity(weights.entries.len());

    for (hotkey, weight) in &weights.entries {
        let start = strings.len();
        strings.extend_from_slice(hotkey.as_bytes());
        offsets.push(start);

        out.push(FwWeight {
            // fixed up after we pin the backing string blob
            hotkey: FwStr { ptr: ptr::null(), len: hotkey.len() },
            weight: *weight,
            ema: report.emas.get(hotkey).copied().unwrap_or(0.0),
        });
    }

    // Pin buffers and fix pointers
    let mut strings_box = strings.into_boxed_slice();
    let strings_ptr = strings_box.as_mut_ptr();
    let strings_len = strings_box.len();

    let mut out_box = out.into_boxed_slice();
    let weights_ptr = out_box.as_mut_ptr();
    let weights_len = out_box.len();

    for (w, off) in out_box.iter_mut().zip(offsets) {
        w.hotkey.ptr = strings_ptr.add(off);
    }

    // Leak boxes to caller; freed by fw_weights_free
    std::mem::forget(strings_box);
    std::mem::forget(out_box);

    arr.weights_ptr = weights_ptr;
    arr.weights_len = weights_len;
    arr.strings_ptr = strings_ptr;
    arr.strings_len = strings_len;
    arr
}

#[no_mangle]
pub unsafe extern "C" fn fw_weights_free(arr: FwWeightArray) {
    if !arr.weights_ptr.is_null() {
        let slice_ptr = ptr::slice_from_raw_parts_mut(arr.weights_ptr, arr.weights_len);
        drop(Box::from_raw(slice_ptr));
    }
    if !arr.strings_ptr.is_null() {
        let slice_ptr = ptr::slice_from_raw_parts_mut(arr.strings_ptr, arr.strings_len);
        drop(Box::from_raw(slice_ptr));
    }
}

/// Snapshot format (binary, little-endian):
/// [u32 magic = "FWE1"][u32 version = 1][u32 count]
/// repeated count times:
///   [u32 strlen][hotkey bytes...][f64 ema]
pub fn encode_snapshot(snap: &EmaSnapshot) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::with_capacity(SNAP_HEADER_LEN + snap.emas.len() * 64);
    buf.extend_from_slice(&SNAP_MAGIC.to_le_bytes());
    buf.extend_from_slice(&SNAP_VERSION.to_le_bytes());
    buf.extend_from_slice(&(snap.emas.len() as u32).to_le_bytes());

    for (hotkey, ema) in &snap.emas {
        let hb = hotkey.as_bytes();
        buf.extend_from_slice(&(hb.len() as u32).to_le_bytes());
        buf.extend_from_slice(hb);
        buf.extend_from_slice(&ema.to_le_bytes());
    }
    buf
}

/// Decode a snapshot blob. The error is one of the `FW_RC_*` codes.
pub fn decode_snapshot(data: &[u8]) -> Result<EmaSnapshot, i32> {
    if data.len() < SNAP_HEADER_LEN {
        return Err(FW_RC_HEADER);
    }
    let mut i = 0usize;
    let read_u32 = |data: &[u8], i: &mut usize| -> Option<u32> {
        let v = u32::from_le_bytes(data.get(*i..*i + 4)?.try_into().ok()?);
        *i += 4;
        Some(v)
    };

    let magic = read_u32(data, &mut i).ok_or(FW_RC_HEADER)?;
    if magic != SNAP_MAGIC {
        return Err(FW_RC_MAGIC);
    }
    let ver = read_u32(data, &mut i).ok_or(FW_RC_HEADER)?;
    if ver != SNAP_VERSION {
        return Err(FW_RC_VERSION);
    }
    let count = read_u32(data, &mut i).ok_or(FW_RC_HEADER)? as usize;

    // Each entry is at least 12 bytes; don't trust `count` for the allocation.
    let mut emas: Vec<(String, f64)> = Vec::with_capacity(count.min(data.len() / 12));
    for _ in 0..count {
        let slen = read_u32(data, &mut i).ok_or(FW_RC_HOTKEY_LEN)? as usize;
        let raw = data.get(i..i + slen).ok_or(FW_RC_HOTKEY_BYTES)?;
        let hotkey = std::str::from_utf8(raw).map_err(|_| FW_RC_HOTKEY_UTF8)?.to_string();
        i += slen;

        let eb: [u8; 8] = data
            .get(i..i + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or(FW_RC_EMA)?;
        i += 8;
        emas.push((hotkey, f64::from_le_bytes(eb)));
    }
    if i != data.len() {
        return Err(FW_RC_TRAILING);
    }
    Ok(EmaSnapshot { emas })
}

#[no_mangle]
pub unsafe extern "C" fn fw_snapshot(h: *mut FwSupervisor) -> FwBytes {
    if h.is_null() {
        return FwBytes { ptr: ptr::null_mut(), len: 0 };
    }
    let handle = &*h;
    let buf = encode_snapshot(&handle.inner.snapshot());

    let mut boxed = buf.into_boxed_slice();
    let ptr = boxed.as_mut_ptr();
    let len = boxed.len();
    std::mem::forget(boxed);

    FwBytes { ptr, len }
}

#[no_mangle]
pub unsafe extern "C" fn fw_bytes_free(b: FwBytes) {
    if !b.ptr.is_null() {
        let slice_ptr = ptr::slice_from_raw_parts_mut(b.ptr, b.len);
        drop(Box::from_raw(slice_ptr));
    }
}

/// Restore EMA state from a `fw_snapshot` blob. `merge != 0` keeps entries
/// absent from the blob; otherwise state is replaced. Nothing is applied
/// when `rc` is negative.
#[no_mangle]
pub unsafe extern "C" fn fw_restore(
    h: *mut FwSupervisor,
    bytes: *const u8,
    len: usize,
    merge: u8,
) -> FwRestoreStats {
    if h.is_null() || bytes.is_null() {
        return FwRestoreStats::err(FW_RC_NULL);
    }
    let handle = &*h;
    let data = std::slice::from_raw_parts(bytes, len);

    let snap = match decode_snapshot(data) {
        Ok(s) => s,
        Err(rc) => return FwRestoreStats::err(rc),
    };
    let stats = if merge != 0 {
        handle.inner.restore_merge(snap)
    } else {
        handle.inner.restore(snap)
    };

    FwRestoreStats {
        applied: stats.applied as u32,
        overwritten: stats.overwritten as u32,
        rc: FW_RC_OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_fwe1() {
        assert_eq!(&SNAP_MAGIC.to_le_bytes(), b"FWE1");
    }

    #[test]
    fn malformed_blobs_get_distinct_codes() {
        let good = encode_snapshot(&EmaSnapshot { emas: vec![("hk".into(), 0.5)] });
        assert!(decode_snapshot(&good).is_ok());

        assert_eq!(decode_snapshot(&good[..8]).unwrap_err(), FW_RC_HEADER);

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert_eq!(decode_snapshot(&bad_magic).unwrap_err(), FW_RC_MAGIC);

        let mut bad_version = good.clone();
        bad_version[4] = 7;
        assert_eq!(decode_snapshot(&bad_version).unwrap_err(), FW_RC_VERSION);

        assert_eq!(decode_snapshot(&good[..14]).unwrap_err(), FW_RC_HOTKEY_LEN);
        assert_eq!(decode_snapshot(&good[..17]).unwrap_err(), FW_RC_HOTKEY_BYTES);
        assert_eq!(decode_snapshot(&good[..20]).unwrap_err(), FW_RC_EMA);

        let mut bad_utf8 = good.clone();
        bad_utf8[16] = 0xff;
        assert_eq!(decode_snapshot(&bad_utf8).unwrap_err(), FW_RC_HOTKEY_UTF8);

        let mut trailing = good;
        trailing.push(0);
        assert_eq!(decode_snapshot(&trailing).unwrap_err(), FW_RC_TRAILING);
    }
}
