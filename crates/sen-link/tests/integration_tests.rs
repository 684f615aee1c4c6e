//! Integration tests for the SEN66 link engine
//!
//! These tests drive a [`DeviceClient`] against the virtual monitor over an
//! in-memory pipe, covering:
//! - Bulk log and TWA downloads, including corrupted rows
//! - Confirmation dialogs for clear, resetmeta and meta
//! - Settings, tables and RTC commands
//! - Status blocks from the measurement stream
//! - Session release when the device goes away

use std::time::Duration;

use sen_link::{ConfirmationOutcome, DeviceClient, FixedDecision, LinkError, TwaStatus};
use sen_protocol::{PrefKey, ProtocolError, TerminalKind};
use sen_sim::{
    spawn_virtual_monitor, VirtualMonitor, VirtualMonitorCommand, VirtualMonitorConfig,
    VIRTUAL_PORT_NAME,
};
use tokio::sync::mpsc;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// A monitor with `rows` logged measurements and no timed measurements
    pub fn quiet_monitor(rows: usize) -> VirtualMonitor {
        VirtualMonitor::new(VirtualMonitorConfig {
            preload_rows: rows,
            auto_measure: false,
            ..Default::default()
        })
    }

    /// Spawn `monitor` and attach a client to it
    pub fn attached(monitor: VirtualMonitor) -> (DeviceClient, mpsc::Sender<VirtualMonitorCommand>) {
        let (host, cmd_tx, _handle) = spawn_virtual_monitor(monitor);
        let mut client = DeviceClient::default();
        client
            .attach_stream(VIRTUAL_PORT_NAME, 115_200, host)
            .unwrap();
        (client, cmd_tx)
    }

    /// Deliver a control command before the next console line
    pub async fn control(tx: &mpsc::Sender<VirtualMonitorCommand>, cmd: VirtualMonitorCommand) {
        tx.send(cmd).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

use helpers::*;

// ============================================================================
// Bulk Transfer Tests
// ============================================================================

mod bulk_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_download_log() {
        let (mut client, _tx) = attached(quiet_monitor(3));

        let extraction = client.download_log().await.unwrap();
        let doc = &extraction.document;

        assert!(extraction.stats.completed);
        assert_eq!(extraction.stats.corrupted, 0);
        assert_eq!(doc.rows.len(), 3);
        assert!(doc
            .header
            .as_deref()
            .unwrap()
            .starts_with("timestamp,local_time,temperature"));
        assert!(doc
            .comments
            .iter()
            .any(|c| c.contains("OSH-Monitor Air Quality Data Log")));
        assert!(doc.rows[0].starts_with("30,30,"));
        assert!(doc.rows[2].starts_with("90,90,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupted_row_is_dropped() {
        let (mut client, tx) = attached(quiet_monitor(3));
        control(&tx, VirtualMonitorCommand::CorruptRow(2)).await;

        let extraction = client.download_log().await.unwrap();

        assert_eq!(extraction.stats.corrupted, 1);
        assert_eq!(extraction.document.rows.len(), 2);
        assert!(extraction.document.rows[1].starts_with("90,90,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_without_log_runs_to_deadline() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let extraction = client.download_log().await.unwrap();

        assert!(!extraction.stats.completed);
        assert!(extraction.document.is_empty());
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_twa() {
        let (mut client, _tx) = attached(quiet_monitor(3));

        let export = client.export_twa().await.unwrap();

        assert_eq!(export.status, TwaStatus::Exported);
        let extraction = export.extraction.unwrap();
        assert!(extraction.stats.completed);
        assert_eq!(extraction.document.rows.len(), 3);
        assert!(extraction
            .document
            .header
            .as_deref()
            .unwrap()
            .contains("twa_pm2_5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_twa_without_data() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let export = client.export_twa().await.unwrap();

        assert_eq!(export.status, TwaStatus::Failed);
        assert!(export.extraction.is_none());
    }
}

// ============================================================================
// Confirmation Tests
// ============================================================================

mod confirmation_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clear_confirmed() {
        let (mut client, _tx) = attached(quiet_monitor(2));

        let report = client.clear_log(&mut FixedDecision::yes()).await.unwrap();
        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.prompted);
        assert_eq!(report.decision.as_deref(), Some("yes"));

        let extraction = client.download_log().await.unwrap();
        assert!(extraction.document.rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancelled() {
        let (mut client, _tx) = attached(quiet_monitor(2));

        let report = client.clear_log(&mut FixedDecision::cancel()).await.unwrap();
        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);

        let extraction = client.download_log().await.unwrap();
        assert_eq!(extraction.document.rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_metadata() {
        let (mut client, _tx) = attached(quiet_monitor(1));

        let report = client
            .reset_metadata(&mut FixedDecision::yes())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report
            .transcript
            .iter()
            .any(|l| l.is_terminal(TerminalKind::MetadataReset)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_without_log_needs_no_prompt() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let report = client
            .set_metadata("user", "Jane Doe", &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(!report.prompted);
        assert!(report.decision.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_with_backup() {
        let (mut client, _tx) = attached(quiet_monitor(2));

        let report = client
            .set_metadata("project", "Lab_Study", &mut FixedDecision::new("download"))
            .await
            .unwrap();

        assert!(report.prompted);
        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        let backup = report.backup.unwrap();
        assert_eq!(backup.rows.len(), 2);
        assert!(backup.header.is_some());

        // The log is untouched
        let extraction = client.download_log().await.unwrap();
        assert_eq!(extraction.document.rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_confirmed_clears_log() {
        let (mut client, tx) = attached(quiet_monitor(2));

        let report = client
            .set_metadata("location", "Room 203", &mut FixedDecision::yes())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.prompted);

        control(&tx, VirtualMonitorCommand::Measure).await;
        let extraction = client.download_log().await.unwrap();
        assert_eq!(extraction.document.rows.len(), 1);
        assert!(extraction
            .document
            .header
            .as_deref()
            .unwrap()
            .contains(",location,"));
        assert!(extraction.document.rows[0].contains(",Room 203,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_value_naming_a_reading() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let report = client
            .set_metadata("project", "CO2_Study", &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report
            .transcript
            .iter()
            .any(|l| l.is_terminal(TerminalKind::MetadataSet) && l.text.contains("CO2_Study")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_change_naming_a_reading_shows_in_table() {
        let (mut client, _tx) = attached(quiet_monitor(2));

        let report = client
            .set_metadata("location", "Humidity_Chamber", &mut FixedDecision::yes())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.prompted);

        let table = client.show_metadata().await.unwrap();
        assert!(table
            .lines
            .iter()
            .any(|l| l.text.starts_with("location") && l.text.contains("Humidity_Chamber")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_amid_measurements_naming_a_reading() {
        let monitor = VirtualMonitor::new(VirtualMonitorConfig {
            measurement_interval_s: 1,
            ..Default::default()
        });
        let (mut client, _tx) = attached(monitor);

        let report = client
            .set_metadata("user", "PM10 Team", &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.transcript.iter().all(|l| !l.is_noise()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_same_value() {
        let (mut client, tx) = attached(quiet_monitor(0));
        client
            .set_metadata("user", "Jane", &mut FixedDecision::yes())
            .await
            .unwrap();
        control(&tx, VirtualMonitorCommand::Measure).await;

        let report = client
            .set_metadata("user", "Jane", &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        assert!(!report.prompted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialog_survives_measurement_stream() {
        let monitor = VirtualMonitor::new(VirtualMonitorConfig {
            preload_rows: 1,
            measurement_interval_s: 1,
            ..Default::default()
        });
        let (mut client, _tx) = attached(monitor);

        let report = client.clear_log(&mut FixedDecision::yes()).await.unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.transcript.iter().all(|l| !l.is_noise()));
    }
}

// ============================================================================
// Command Tests
// ============================================================================

mod command_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_pref() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let reply = client.set_pref(PrefKey::Measurement, 60).await.unwrap();

        assert!(reply.ended_with(TerminalKind::SettingApplied));
        assert!(reply
            .lines
            .iter()
            .any(|l| l.text == "Measurement interval set to 60 seconds"));
        assert!(reply
            .lines
            .iter()
            .any(|l| l.text == "Configuration saved to NVS"));

        let config = client.show_config().await.unwrap();
        assert!(config
            .lines
            .iter()
            .any(|l| l.text.contains("measurement") && l.text.contains("60 seconds")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_timezone_validated_locally() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let err = client.set_timezone(20).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::Protocol(ProtocolError::UtcOffsetOutOfRange(20))
        ));
        assert!(client.is_connected());

        let reply = client.set_timezone(-5).await.unwrap();
        assert!(reply.lines.iter().any(|l| l.text == "UTC offset set to -5 hours"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_metadata() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let reply = client.show_metadata().await.unwrap();

        assert!(reply.ended_with(TerminalKind::Tip));
        assert!(reply
            .lines
            .iter()
            .any(|l| l.text.starts_with("device_name") && l.text.contains("OSH-Monitor-SIM")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtc_sync_then_status() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let status = client.rtc_status().await.unwrap();
        assert!(status.ended_with(TerminalKind::RtcStatus));
        assert!(status.lines.iter().any(|l| l.text == "Initialized: NO"));

        let sync = client.rtc_sync(1_700_000_000).await.unwrap();
        assert!(sync.ended_with(TerminalKind::RtcSynced));
        assert!(!sync.is_error());

        let status = client.rtc_status().await.unwrap();
        assert!(status.lines.iter().any(|l| l.text == "Initialized: YES"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtc_sync_rejected() {
        let (mut client, _tx) = attached(quiet_monitor(0));

        let reply = client.rtc_sync(0).await.unwrap();

        assert!(reply.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_waits_for_block() {
        let monitor = VirtualMonitor::new(VirtualMonitorConfig {
            measurement_interval_s: 10,
            ..Default::default()
        });
        let (mut client, _tx) = attached(monitor);

        let block = client.status().await.unwrap().unwrap();

        assert!(block.complete);
        assert_eq!(block.number(), Some(1));
        assert!(block.lines.last().unwrap().text.starts_with("TWA PM10:"));
    }
}

// ============================================================================
// Session Tests
// ============================================================================

mod session_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_device_loss_releases_session() {
        let (mut client, tx) = attached(quiet_monitor(1));
        control(&tx, VirtualMonitorCommand::Shutdown).await;

        let err = client.download_log().await.unwrap_err();

        assert!(err.is_transport_failure());
        assert!(!client.is_connected());
        assert!(matches!(
            client.show_config().await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_forwards_lines() {
        let monitor = VirtualMonitor::new(VirtualMonitorConfig {
            measurement_interval_s: 1,
            ..Default::default()
        });
        let (mut client, _tx) = attached(monitor);
        let mut starts = 0;

        let forwarded = client
            .monitor(tokio::time::sleep(Duration::from_millis(3_500)), |line| {
                if line.measurement().is_some() && line.text.contains("Measurement #") {
                    starts += 1;
                }
            })
            .await
            .unwrap();

        assert_eq!(starts, 3);
        assert!(forwarded > 3);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn metadata_value_round_trips_through_table(
            value in "[a-z0-9_][a-z0-9_ ]{0,18}[a-z0-9_]"
        ) {
            let shown = paused_runtime().block_on(async {
                let (mut client, _tx) = attached(quiet_monitor(0));
                let report = client
                    .set_metadata("project", &value, &mut FixedDecision::yes())
                    .await
                    .unwrap();
                assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
                client.show_metadata().await.unwrap()
            });

            prop_assert!(shown
                .lines
                .iter()
                .any(|l| l.text.starts_with("project") && l.text.ends_with(value.as_str())));
        }

        #[test]
        fn download_keeps_every_clean_row(rows in 1usize..12, corrupt in 0usize..12) {
            let extraction = paused_runtime().block_on(async {
                let (mut client, tx) = attached(quiet_monitor(rows));
                control(&tx, VirtualMonitorCommand::CorruptRow(corrupt)).await;
                client.download_log().await.unwrap()
            });

            let dropped = usize::from((1..=rows).contains(&corrupt));
            prop_assert!(extraction.stats.completed);
            prop_assert_eq!(extraction.stats.corrupted, dropped);
            prop_assert_eq!(extraction.document.rows.len(), rows - dropped);
        }
    }
}
