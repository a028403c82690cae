use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::servo::config::BusConfig;
use crate::servo::protocol::byte_order::{to_host, Endianness};
use crate::servo::protocol::comm::{into_result, BusError, CommResult, ErrorByte};
use crate::servo::protocol::group_sync_read::GroupSyncRead;
use crate::servo::protocol::group_sync_write::GroupSyncWrite;
use crate::servo::protocol::port_handler::{PortHandler, SimPort};
use crate::servo::protocol::protocol_packet_handler::ProtocolPacketHandler;
use crate::servo::sim::{FeetechBusSim, DEFAULT_MODEL_NUMBER};
use crate::servo::sts::{
    SPEED_SIGN_BIT, STS_ACC, STS_GOAL_POSITION_L, STS_PRESENT_POSITION_L, STS_PRESENT_SPEED_L,
    STS_TORQUE_ENABLE,
};

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

fn bus(ids: &[u8]) -> ProtocolPacketHandler<SimPort> {
    init_logger();
    let mut sim = FeetechBusSim::new();
    for id in ids {
        sim.add_servo(*id);
    }
    ProtocolPacketHandler::new(SimPort::new(sim), Endianness::Little)
}

#[test]
fn write_read_roundtrip() {
    let mut handler = bus(&[1]);

    let (result, error) = handler.write_tx_rx(1, 0x10, &[0x12, 0x34]);
    assert_eq!(result, CommResult::Success);
    assert_eq!(error, ErrorByte::NONE);

    let (data, result, error) = handler.read_tx_rx(1, 0x10, 2);
    assert_eq!(result, CommResult::Success);
    assert_eq!(error, ErrorByte::NONE);
    assert_eq!(data, vec![0x12, 0x34]);
}

#[test]
fn reg_write_waits_for_action() {
    let mut handler = bus(&[1]);

    let (result, error) = handler.reg_write_tx_rx(1, 0x20, &[0xAA, 0xBB]);
    assert_eq!(result, CommResult::Success);
    assert_eq!(error, ErrorByte::NONE);

    let (data, _, _) = handler.read_tx_rx(1, 0x20, 2);
    assert_eq!(data, vec![0x00, 0x00]);

    assert_eq!(handler.action(0xFE), CommResult::Success);

    let (data, _, _) = handler.read_tx_rx(1, 0x20, 2);
    assert_eq!(data, vec![0xAA, 0xBB]);
}

#[test]
fn ping_reports_model_number() {
    let mut handler = bus(&[3]);

    let (model, result, error) = handler.ping(3);
    assert_eq!(result, CommResult::Success);
    assert_eq!(error, ErrorByte::NONE);
    assert_eq!(model, DEFAULT_MODEL_NUMBER);

    let (model, result, _) = handler.ping(0xFE);
    assert_eq!(result, CommResult::NotAvailable);
    assert_eq!(model, 0);
}

#[test]
fn fixed_width_helpers_use_handler_byte_order() {
    let mut handler = bus(&[1]);

    let (result, _) = handler.write_2byte_tx_rx(1, STS_GOAL_POSITION_L, 2048);
    assert_eq!(result, CommResult::Success);
    assert_eq!(handler.port().sim().register(1, STS_GOAL_POSITION_L), Some(0x00));
    assert_eq!(handler.port().sim().register(1, STS_GOAL_POSITION_L + 1), Some(0x08));

    let (result, _) = handler.write_4byte_tx_rx(1, 0x50, 0x1122_3344);
    assert_eq!(result, CommResult::Success);
    let (value, result, _) = handler.read_4byte_tx_rx(1, 0x50);
    assert_eq!(result, CommResult::Success);
    assert_eq!(value, 0x1122_3344);

    handler
        .port_mut()
        .sim_mut()
        .set_registers(1, STS_PRESENT_SPEED_L, &[0x32, 0x80]);
    let (raw, _, _) = handler.read_2byte_tx_rx(1, STS_PRESENT_SPEED_L);
    assert_eq!(to_host(raw, SPEED_SIGN_BIT), -50);
}

#[test]
fn write_only_does_not_wait() {
    let mut handler = bus(&[1]);
    handler.port_mut().sim_mut().set_silent(1, true);

    let start = Instant::now();
    assert_eq!(handler.write_1byte_tx_only(1, STS_TORQUE_ENABLE, 0), CommResult::Success);
    assert!(start.elapsed() < Duration::from_millis(40));
    assert!(!handler.is_using());
    assert_eq!(handler.port().sim().register(1, STS_TORQUE_ENABLE), Some(0));
}

#[test]
fn split_read_blocks_other_transactions() {
    let mut handler = bus(&[1]);

    assert_eq!(handler.read_2byte_tx(1, STS_PRESENT_POSITION_L), CommResult::Success);
    assert_eq!(handler.ping(1).1, CommResult::PortBusy);
    assert_eq!(handler.action(1), CommResult::PortBusy);

    let (_, result, _) = handler.read_2byte_rx(1);
    assert_eq!(result, CommResult::Success);
    assert_eq!(handler.ping(1).1, CommResult::Success);
}

#[test]
fn silent_bus_times_out_within_budget() {
    let mut handler = bus(&[1]);
    handler.port_mut().sim_mut().set_swallow_all(true);

    let start = Instant::now();
    let (data, result, error) = handler.read_tx_rx(1, STS_PRESENT_POSITION_L, 2);
    let elapsed = start.elapsed();

    assert_eq!(result, CommResult::RxTimeout);
    assert_eq!(error, ErrorByte::NONE);
    assert!(data.is_empty());
    assert!(elapsed >= Duration::from_millis(45), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "returned after {:?}", elapsed);
    assert!(!handler.is_using());
}

#[test]
fn receive_resynchronizes_after_line_noise() {
    let mut handler = bus(&[1]);
    handler
        .port_mut()
        .sim_mut()
        .inject_noise(&[0x00, 0xFF, 0x42, 0xFF, 0xFF, 0xFF]);

    let (model, result, _) = handler.read_2byte_tx_rx(1, 3);
    assert_eq!(result, CommResult::Success);
    assert_eq!(model, DEFAULT_MODEL_NUMBER);
}

#[test]
fn reply_from_other_id_is_skipped() {
    let mut handler = bus(&[1]);
    handler
        .port_mut()
        .sim_mut()
        .inject_noise(&[0xFF, 0xFF, 0x07, 0x02, 0x00, 0xF6]);

    let (result, error) = handler.write_1byte_tx_rx(1, STS_ACC, 10);
    assert_eq!(result, CommResult::Success);
    assert_eq!(error, ErrorByte::NONE);
}

#[test]
fn damaged_reply_is_corrupt() {
    let mut handler = bus(&[1]);
    handler.port_mut().sim_mut().corrupt_next_reply();

    let (data, result, _) = handler.read_tx_rx(1, STS_PRESENT_POSITION_L, 2);
    assert_eq!(result, CommResult::RxCorrupt);
    assert!(data.is_empty());

    let (_, result, _) = handler.read_tx_rx(1, STS_PRESENT_POSITION_L, 2);
    assert_eq!(result, CommResult::Success);
}

#[test]
fn servo_fault_travels_next_to_success() {
    let mut handler = bus(&[1]);
    handler.port_mut().sim_mut().set_error(1, 0x20);

    let (result, error) = handler.write_1byte_tx_rx(1, STS_ACC, 10);
    assert_eq!(result, CommResult::Success);
    assert!(error.overload());
    assert_eq!(
        handler.rx_packet_error(error),
        "[ServoStatus] Overload error!"
    );
    assert_eq!(into_result((), result, error), Err(BusError::Servo(error)));
}

#[test]
fn list_servos_skips_faulty_and_missing_ids() {
    init_logger();
    let mut sim = FeetechBusSim::new();
    for id in [1, 5, 9] {
        sim.add_servo(id);
    }
    sim.set_error(5, 0x04);
    let config = BusConfig::default().with_latency_ms(1.0);
    let mut handler = ProtocolPacketHandler::with_config(SimPort::new(sim), &config);

    assert_eq!(handler.list_servos(), vec![1, 9]);
}

#[test]
fn sync_read_group_parses_frames() {
    let mut handler = bus(&[1, 2]);

    let _ = handler.write_tx_rx(1, 0x30, &[0x10, 0x20]);
    let _ = handler.write_tx_rx(2, 0x30, &[0x30, 0x40]);

    let mut group = GroupSyncRead::new(0x30, 2);
    assert!(group.add_param(2));
    assert!(group.add_param(1));

    let result = group.tx_rx_packet(&mut handler);
    assert_eq!(result, CommResult::Success);
    assert!(group.last_result());

    let endianness = handler.endianness();
    assert_eq!(group.is_available(1, 0x30, 2), (true, ErrorByte::NONE));
    assert_eq!(group.get_data(1, 0x30, 2, endianness), 0x2010);
    assert_eq!(group.get_data(2, 0x30, 2, endianness), 0x4030);
    assert_eq!(group.get_data(2, 0x31, 1, endianness), 0x40);

    let written = handler.port_mut().take_written();
    let sync_read = written.last().expect("sync read frame");
    assert_eq!(&sync_read[4..], &[0x82, 0x30, 0x02, 0x01, 0x02, 0x44]);
}

#[test]
fn sync_read_with_silent_member_keeps_the_others() {
    let mut handler = bus(&[1, 2]);
    let _ = handler.write_tx_rx(1, 0x30, &[0x10, 0x20]);
    handler.port_mut().sim_mut().set_silent(2, true);

    let mut group = GroupSyncRead::new(0x30, 2);
    group.add_param(1);
    group.add_param(2);

    let result = group.tx_rx_packet(&mut handler);
    assert_eq!(result, CommResult::RxCorrupt);
    assert!(!group.last_result());
    assert!(!handler.is_using());

    assert!(group.is_available(1, 0x30, 2).0);
    assert_eq!(group.get_data(1, 0x30, 2, Endianness::Little), 0x2010);
    assert!(!group.is_available(2, 0x30, 2).0);
}

#[test]
fn sync_read_on_silent_bus_times_out() {
    let mut handler = bus(&[1, 2]);
    handler.port_mut().sim_mut().set_swallow_all(true);

    let mut group = GroupSyncRead::new(0x30, 2);
    group.add_param(1);
    group.add_param(2);

    assert_eq!(group.tx_rx_packet(&mut handler), CommResult::RxTimeout);
    assert!(!group.last_result());
    assert!(!group.is_available(1, 0x30, 2).0);
}

#[test]
fn sync_write_group_updates_registers() {
    let mut handler = bus(&[1, 2]);

    let mut group = GroupSyncWrite::new(0x40, 2);
    assert!(group.add_param(2, &[0x77, 0x88]));
    assert!(group.add_param(1, &[0x55]));

    assert_eq!(group.tx_packet(&mut handler), CommResult::Success);

    let (data, _, _) = handler.read_tx_rx(1, 0x40, 2);
    assert_eq!(data, vec![0x55, 0x00]);

    let (data, _, _) = handler.read_tx_rx(2, 0x40, 2);
    assert_eq!(data, vec![0x77, 0x88]);
}

#[test]
fn oversized_sync_write_is_rejected() {
    let mut handler = bus(&[1]);

    let mut group = GroupSyncWrite::new(0x00, 200);
    group.add_param(1, &[0u8; 200]);
    group.add_param(2, &[0u8; 200]);

    assert_eq!(group.tx_packet(&mut handler), CommResult::TxError);
    assert!(group.is_available());
    assert!(handler.port_mut().take_written().is_empty());
}

#[test]
fn rejected_write_keeps_split_read_in_flight() {
    let mut handler = bus(&[1]);

    assert_eq!(handler.read_1byte_tx(1, STS_PRESENT_POSITION_L), CommResult::Success);
    assert_eq!(handler.write_1byte_tx_only(0xFF, STS_ACC, 1), CommResult::PortBusy);
    assert_eq!(handler.reg_write_tx_only(0xFF, STS_ACC, &[1]), CommResult::PortBusy);
    assert!(handler.is_using());

    let (result, _) = handler.write_1byte_tx_rx(1, STS_ACC, 1);
    assert_eq!(result, CommResult::PortBusy);

    let (_, result, _) = handler.read_1byte_rx(1);
    assert_eq!(result, CommResult::Success);
    assert!(!handler.is_using());

    assert_eq!(handler.write_1byte_tx_only(0xFF, STS_ACC, 1), CommResult::NotAvailable);
    assert!(!handler.is_using());
}

#[test]
fn rejected_write_keeps_sync_read_in_flight() {
    let mut handler = bus(&[1, 2]);

    assert_eq!(handler.sync_read_tx(0x30, 2, &[1, 2]), CommResult::Success);
    assert_eq!(handler.write_tx_only(0xFF, STS_ACC, &[1]), CommResult::PortBusy);
    assert!(handler.is_using());

    let (result, data) = handler.sync_read_rx(2, 2);
    assert_eq!(result, CommResult::Success);
    assert_eq!(data.len(), 16);
    assert!(!handler.is_using());
}

/// Transport that answers every read with status packets from servo 7.
struct ChattyPort {
    frame: Vec<u8>,
    cursor: usize,
    start_time: Instant,
}

impl ChattyPort {
    fn new() -> Self {
        Self {
            frame: vec![0xFF, 0xFF, 0x07, 0x02, 0x00, 0xF6],
            cursor: 0,
            start_time: Instant::now(),
        }
    }
}

impl PortHandler for ChattyPort {
    fn open_port(&mut self) -> bool {
        true
    }

    fn close_port(&mut self) {}

    fn is_open(&self) -> bool {
        true
    }

    fn clear_port(&mut self) {
        self.cursor = 0;
    }

    fn read_port(&mut self, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        for _ in 0..length {
            out.push(self.frame[self.cursor]);
            self.cursor = (self.cursor + 1) % self.frame.len();
        }
        out
    }

    fn write_port(&mut self, packet: &[u8]) -> usize {
        packet.len()
    }

    fn get_current_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    fn set_baud_rate(&mut self, _baudrate: u32) -> bool {
        true
    }

    fn get_baud_rate(&self) -> u32 {
        1_000_000
    }

    fn get_bytes_available(&self) -> usize {
        self.frame.len()
    }
}

#[test]
fn replies_from_other_ids_do_not_extend_the_deadline() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut handler = ProtocolPacketHandler::new(ChattyPort::new(), Endianness::Little);
        let start = Instant::now();
        let (result, _) = handler.write_1byte_tx_rx(1, STS_ACC, 10);
        let _ = tx.send((result, start.elapsed(), handler.is_using()));
    });

    let (result, elapsed, is_using) = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("receive ended at the deadline");
    assert_eq!(result, CommResult::RxTimeout);
    assert!(elapsed >= Duration::from_millis(45), "returned after {:?}", elapsed);
    assert!(!is_using);
}

#[test]
fn sync_read_reports_member_error_byte() {
    let mut handler = bus(&[1, 2]);
    let _ = handler.write_tx_rx(2, 0x30, &[0x30, 0x40]);
    handler.port_mut().sim_mut().set_error(2, 0x20);

    let mut group = GroupSyncRead::new(0x30, 2);
    group.add_param(1);
    group.add_param(2);

    assert_eq!(group.tx_rx_packet(&mut handler), CommResult::Success);
    assert!(group.last_result());
    assert_eq!(group.is_available(1, 0x30, 2), (true, ErrorByte::NONE));
    assert_eq!(group.is_available(2, 0x30, 2), (true, ErrorByte(0x20)));
    assert_eq!(group.get_data(2, 0x30, 2, handler.endianness()), 0x4030);
}
