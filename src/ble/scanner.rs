//! LE scanning.
//!
//! [`LeScanner`] drives one scan on an [`HciDevice`]: configure, enable, read
//! advertising reports until a target turns up or the wait budget runs out,
//! then disable. The loop blocks its thread and checks a
//! [`CancellationToken`] between short polls, so it belongs on a blocking
//! task.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::DeviceSignature;
use crate::ble::filter;
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::hci::{
    decode_event, AddressType, AdvertisingReport, BdAddr, HciDevice, HciEvent, HciFilter,
    HCI_MAX_EVENT_SIZE,
};

/// Longest single wait before the cancellation token is checked again.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// The device a scan settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedDevice {
    /// Advertiser address.
    pub address: BdAddr,
    /// Advertiser address type; used for the connection.
    pub address_type: AddressType,
    /// Decoded advertising signature.
    pub signature: DeviceSignature,
    /// Signal strength of the matching report.
    pub rssi: Option<i8>,
}

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A report passed the discovery filter and matched the target.
    Matched(MatchedDevice),
    /// A wait ran through the whole remaining budget without an event.
    TimedOut,
    /// The device reported end of data.
    EndOfData,
    /// The cancellation token fired.
    Interrupted,
}

impl ScanOutcome {
    /// The matched device, if any.
    pub fn matched(&self) -> Option<&MatchedDevice> {
        match self {
            Self::Matched(device) => Some(device),
            _ => None,
        }
    }
}

/// Scans an HCI device for an unconfigured target.
pub struct LeScanner<D> {
    device: D,
    config: ScanConfig,
}

impl<D: HciDevice> LeScanner<D> {
    /// Create a scanner over `device`.
    pub fn new(device: D, config: ScanConfig) -> Self {
        Self { device, config }
    }

    /// The scan configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Give back the underlying device.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Run one scan.
    ///
    /// Scanning is disabled again before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanSetup`] if the controller rejects the scan
    /// commands, or an I/O error if the socket fails while reading.
    pub fn scan(&mut self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let dup = self.config.filter_duplicates;

        self.device
            .set_scan_parameters(&self.config)
            .map_err(|e| Error::ScanSetup {
                reason: format!("set scan parameters failed: {}", e),
            })?;

        self.device
            .set_scan_enable(true, dup)
            .map_err(|e| Error::ScanSetup {
                reason: format!("enable scan failed: {}", e),
            })?;

        info!("LE scan started ({:?})", self.config.discovery);

        let outcome = self.listen(cancel);
        let disabled = self.device.set_scan_enable(false, dup);

        match (outcome, disabled) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(Error::ScanSetup {
                reason: format!("disable scan failed: {}", e),
            }),
            (Err(e), disabled) => {
                if let Err(disable_err) = disabled {
                    warn!("Disable scan failed: {}", disable_err);
                }
                Err(e)
            }
        }
    }

    /// Swap in the LE-meta filter for the duration of the read loop.
    fn listen(&mut self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let saved = self.device.filter()?;
        self.device.set_filter(&HciFilter::le_meta_only())?;

        let outcome = self.read_reports(cancel);
        let restored = self.device.set_filter(&saved);

        let outcome = outcome?;
        restored?;
        Ok(outcome)
    }

    fn read_reports(&mut self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let mut budget_ms = self.config.budget_ms;
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        loop {
            if let Some(outcome) = self.wait_for_event(budget_ms, cancel)? {
                return Ok(outcome);
            }

            let len = self.device.read_packet(&mut buf)?;
            if len == 0 {
                debug!("HCI device reported end of data");
                return Ok(ScanOutcome::EndOfData);
            }
            budget_ms = budget_ms.saturating_sub(self.config.budget_step_ms);

            let reports = match decode_event(&buf[..len]) {
                Ok(HciEvent::AdvertisingReports(reports)) => reports,
                Ok(other) => {
                    trace!("Skipping {:?}", other);
                    continue;
                }
                Err(e) => {
                    trace!("Skipping undecodable event: {}", e);
                    continue;
                }
            };

            if let Some(device) = self.find_target(&reports) {
                return Ok(ScanOutcome::Matched(device));
            }
        }
    }

    /// Wait up to `budget_ms` for an event in [`POLL_SLICE`] steps. Returns
    /// `None` once an event is ready.
    fn wait_for_event(
        &mut self,
        budget_ms: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<ScanOutcome>> {
        let limit = Duration::from_millis(u64::from(budget_ms));
        let mut waited = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                info!("Scan interrupted");
                return Ok(Some(ScanOutcome::Interrupted));
            }
            if waited >= limit {
                info!("Scan timed out");
                return Ok(Some(ScanOutcome::TimedOut));
            }

            let slice = POLL_SLICE.min(limit - waited);
            if self.device.poll_readable(slice)? {
                return Ok(None);
            }
            waited += slice;
        }
    }

    fn find_target(&self, reports: &[AdvertisingReport<'_>]) -> Option<MatchedDevice> {
        for report in reports {
            if !filter::accepts(report.data, self.config.discovery) {
                trace!("{} rejected by discovery filter", report.address);
                continue;
            }

            let Some(signature) = DeviceSignature::decode(report.data) else {
                debug!("{} sent a truncated advertisement", report.address);
                continue;
            };

            debug!(
                "{} {} name={:?} manufacturer={:?}",
                report.address, report.address_type, signature.name, signature.manufacturer
            );

            if filter::is_target(&signature) {
                info!("Found unconfigured device {}", report.address);
                return Some(MatchedDevice {
                    address: report.address,
                    address_type: report.address_type,
                    signature,
                    rssi: report.rssi,
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::filter::DiscoveryProcedure;
    use crate::hci::{MockHciDevice, EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PKT};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;

    const TARGET_AD: &[u8] = &[0x02, 0x01, 0x06, 0x06, 0xFF, 0x5C, 0x00, 0x01, 0x02, 0x00];
    const CONFIGURED_AD: &[u8] = &[0x02, 0x01, 0x06, 0x06, 0xFF, 0x5C, 0x00, 0x01, 0x02, 0x01];

    fn saved_filter() -> HciFilter {
        HciFilter {
            type_mask: 0xFFFF_FFFF,
            event_mask: [0xFFFF_FFFF, 0xFFFF_FFFF],
            opcode: 0,
        }
    }

    fn report_event(reports: &[(u8, &[u8])]) -> Vec<u8> {
        let mut params = vec![EVT_LE_ADVERTISING_REPORT, reports.len() as u8];
        for (last, data) in reports {
            params.extend_from_slice(&[0x00, 0x00, *last, 0x22, 0x33, 0x44, 0x55, 0x66]);
            params.push(data.len() as u8);
            params.extend_from_slice(data);
            params.push(0xC0);
        }
        let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, params.len() as u8];
        packet.extend(params);
        packet
    }

    /// A device that plays back `packets` and records installed filters.
    fn scripted_device(packets: Vec<Vec<u8>>, filters: Arc<Mutex<Vec<HciFilter>>>) -> MockHciDevice {
        let mut device = MockHciDevice::new();
        device.expect_set_scan_parameters().returning(|_| Ok(()));
        device.expect_set_scan_enable().returning(|_, _| Ok(()));
        device.expect_filter().returning(|| Ok(saved_filter()));
        device.expect_set_filter().returning(move |f| {
            filters.lock().push(*f);
            Ok(())
        });

        let mut packets = VecDeque::from(packets);
        let remaining = packets.len();
        let mut polled = 0usize;
        device.expect_poll_readable().returning(move |_| {
            polled += 1;
            Ok(polled <= remaining)
        });
        device.expect_read_packet().returning(move |buf| match packets.pop_front() {
            Some(p) => {
                buf[..p.len()].copy_from_slice(&p);
                Ok(p.len())
            }
            None => Ok(0),
        });
        device
    }

    #[test]
    fn test_matches_target_and_restores_filter() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let device = scripted_device(
            vec![
                report_event(&[(0x01, CONFIGURED_AD)]),
                report_event(&[(0x02, &[0x02, 0x01, 0x06]), (0x03, TARGET_AD)]),
            ],
            filters.clone(),
        );

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        let outcome = scanner.scan(&CancellationToken::new()).unwrap();

        let matched = outcome.matched().expect("target should match");
        assert_eq!(matched.address.to_string(), "66:55:44:33:22:03");
        assert_eq!(matched.address_type, AddressType::Public);
        assert_eq!(matched.rssi, Some(-64));

        let filters = filters.lock();
        assert_eq!(filters.first(), Some(&HciFilter::le_meta_only()));
        assert_eq!(filters.last(), Some(&saved_filter()));
    }

    #[test]
    fn test_times_out_without_events() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let device = scripted_device(Vec::new(), filters.clone());

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        assert_eq!(
            scanner.scan(&CancellationToken::new()).unwrap(),
            ScanOutcome::TimedOut
        );
        assert_eq!(filters.lock().last(), Some(&saved_filter()));
    }

    #[test]
    fn test_zero_budget_times_out_immediately() {
        let mut device = MockHciDevice::new();
        device.expect_set_scan_parameters().returning(|_| Ok(()));
        device.expect_set_scan_enable().times(2).returning(|_, _| Ok(()));
        device.expect_filter().returning(|| Ok(saved_filter()));
        device.expect_set_filter().times(2).returning(|_| Ok(()));
        device.expect_poll_readable().never();

        let config = ScanConfig {
            budget_ms: 0,
            ..ScanConfig::default()
        };
        let mut scanner = LeScanner::new(device, config);
        assert_eq!(
            scanner.scan(&CancellationToken::new()).unwrap(),
            ScanOutcome::TimedOut
        );
    }

    #[test]
    fn test_budget_is_consumed_per_event() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        // two non-matching events eat the whole 20 ms budget
        let device = scripted_device(
            vec![
                report_event(&[(0x01, CONFIGURED_AD)]),
                report_event(&[(0x02, CONFIGURED_AD)]),
                report_event(&[(0x03, TARGET_AD)]),
            ],
            filters,
        );
        let config = ScanConfig {
            budget_ms: 20,
            ..ScanConfig::default()
        };

        let mut scanner = LeScanner::new(device, config);
        assert_eq!(
            scanner.scan(&CancellationToken::new()).unwrap(),
            ScanOutcome::TimedOut
        );
    }

    #[test]
    fn test_end_of_data() {
        let mut device = MockHciDevice::new();
        device.expect_set_scan_parameters().returning(|_| Ok(()));
        device.expect_set_scan_enable().returning(|_, _| Ok(()));
        device.expect_filter().returning(|| Ok(saved_filter()));
        device.expect_set_filter().times(2).returning(|_| Ok(()));
        device.expect_poll_readable().returning(|_| Ok(true));
        device.expect_read_packet().returning(|_| Ok(0));

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        assert_eq!(
            scanner.scan(&CancellationToken::new()).unwrap(),
            ScanOutcome::EndOfData
        );
    }

    #[test]
    fn test_non_advertising_events_are_skipped() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let device = scripted_device(
            vec![
                vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0x01, 0x01],
                vec![HCI_EVENT_PKT, 0x0E, 0x01, 0x00],
                report_event(&[(0x04, TARGET_AD)]),
            ],
            filters,
        );

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        let outcome = scanner.scan(&CancellationToken::new()).unwrap();
        assert!(outcome.matched().is_some());
    }

    #[test]
    fn test_discovery_filter_gates_target() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        // target record without Flags fails general discovery
        let device = scripted_device(
            vec![report_event(&[(0x05, &TARGET_AD[3..])])],
            filters,
        );
        let config = ScanConfig::default().with_discovery(DiscoveryProcedure::General);

        let mut scanner = LeScanner::new(device, config);
        assert_eq!(
            scanner.scan(&CancellationToken::new()).unwrap(),
            ScanOutcome::TimedOut
        );
    }

    #[test]
    fn test_cancelled_scan_disables_and_restores() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let enables = Arc::new(Mutex::new(Vec::new()));

        let mut device = MockHciDevice::new();
        device.expect_set_scan_parameters().returning(|_| Ok(()));
        let recorded = enables.clone();
        device.expect_set_scan_enable().returning(move |enable, _| {
            recorded.lock().push(enable);
            Ok(())
        });
        device.expect_filter().returning(|| Ok(saved_filter()));
        let recorded = filters.clone();
        device.expect_set_filter().returning(move |f| {
            recorded.lock().push(*f);
            Ok(())
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        device.expect_poll_readable().returning(move |_| {
            trigger.cancel();
            Ok(false)
        });

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        assert_eq!(scanner.scan(&cancel).unwrap(), ScanOutcome::Interrupted);
        assert_eq!(*enables.lock(), vec![true, false]);
        assert_eq!(filters.lock().last(), Some(&saved_filter()));
    }

    #[test]
    fn test_read_error_still_restores_filter() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let mut device = MockHciDevice::new();
        device.expect_set_scan_parameters().returning(|_| Ok(()));
        device.expect_set_scan_enable().returning(|_, _| Ok(()));
        device.expect_filter().returning(|| Ok(saved_filter()));
        let recorded = filters.clone();
        device.expect_set_filter().returning(move |f| {
            recorded.lock().push(*f);
            Ok(())
        });
        device.expect_poll_readable().returning(|_| Ok(true));
        device
            .expect_read_packet()
            .returning(|_| Err(io::Error::new(io::ErrorKind::Other, "adapter gone")));

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        assert!(matches!(
            scanner.scan(&CancellationToken::new()),
            Err(Error::Io(_))
        ));
        assert_eq!(filters.lock().last(), Some(&saved_filter()));
    }

    #[test]
    fn test_rejected_parameters_are_setup_errors() {
        let mut device = MockHciDevice::new();
        device
            .expect_set_scan_parameters()
            .returning(|_| Err(io::Error::new(io::ErrorKind::Other, "status 0x0c")));
        device.expect_set_scan_enable().never();

        let mut scanner = LeScanner::new(device, ScanConfig::default());
        assert!(matches!(
            scanner.scan(&CancellationToken::new()),
            Err(Error::ScanSetup { .. })
        ));
    }
}
