// End-to-end session tests over a scripted in-memory transport
//
// The mock parses every frame the session writes (validating the checksum
// trailer), logs it, and answers from a per-test responder closure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mdwp_client::commands::opcodes;
use mdwp_client::protocol::{checksum, encode_frame, parse_wire_string, MdwpResult, RESPONSE_BIT};
use mdwp_client::{
    ClassResolver, DebugSession, FieldInfo, LineInfo, LocalVar, StopReason, Transport,
    TransportEvent, Variable,
};

type Responder = Box<dyn FnMut(u8, &[u8]) -> Vec<Vec<u8>> + Send>;

struct MockTransport {
    connected: AtomicBool,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<TransportEvent>>>,
    responder: StdMutex<Responder>,
    writes: StdMutex<Vec<(u8, Vec<u8>)>>,
}

impl MockTransport {
    fn new(responder: Responder) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(64);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
            responder: StdMutex::new(responder),
            writes: StdMutex::new(Vec::new()),
        })
    }

    fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    fn written_opcodes(&self) -> Vec<u8> {
        self.writes().iter().map(|(cmd, _)| *cmd).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> MdwpResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, bytes: &[u8]) -> bool {
        // Validate framing the way the agent would
        assert!(bytes.len() >= 6, "frame shorter than header + trailer");
        let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]) as usize;
        assert_eq!(len, bytes.len(), "length field mismatch");
        let crc = u16::from_le_bytes([bytes[len - 2], bytes[len - 1]]);
        assert_eq!(crc, checksum(&bytes[..len - 2]), "checksum trailer mismatch");

        let cmd = bytes[0];
        let payload = bytes[4..len - 2].to_vec();
        self.writes.lock().unwrap().push((cmd, payload.clone()));

        let chunks = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(cmd, &payload)
        };
        for chunk in chunks {
            self.event_tx.send(TransportEvent::Data(chunk)).await.ok();
        }
        true
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.lock().unwrap().take()
    }
}

/// Response frame: echoed opcode with the reply bit, OK code, then `data`.
fn ok_frame(cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend_from_slice(data);
    encode_frame(cmd | RESPONSE_BIT, &payload)
}

/// Inbound sized string: `len:u16 | pad:u16 | bytes [| 0x00]`.
fn sized_str(s: &str, terminated: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + s.len());
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(s.as_bytes());
    if terminated {
        out.push(0);
    }
    out
}

/// READ_STACK_TRACE response for one frame.
fn stack_trace_data(idx: u32, pc: u32, class: &str, method: &str, descriptor: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&idx.to_le_bytes());
    out.extend_from_slice(&pc.to_le_bytes());
    out.extend_from_slice(&sized_str(class, true));
    out.extend_from_slice(&sized_str(method, true));
    out.extend_from_slice(&sized_str(descriptor, false));
    out
}

/// READ_LOCAL / READ_FIELD response: `size | value:u32 [| type]`.
fn slot_data(size: u32, raw: u32, type_name: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&raw.to_le_bytes());
    if let Some(name) = type_name {
        out.extend_from_slice(&sized_str(name, false));
    }
    out
}

#[derive(Default)]
struct TestResolver {
    by_line: Vec<(u32, String, LineInfo)>,
    by_pc: Vec<LineInfo>,
    fields: HashMap<String, Vec<FieldInfo>>,
    ancestors: Vec<(String, String)>,
}

impl ClassResolver for TestResolver {
    fn line_from_source(&self, line: u32, source_path: &str) -> Option<LineInfo> {
        self.by_line
            .iter()
            .find(|(l, path, _)| *l == line && path == source_path)
            .map(|(_, _, info)| info.clone())
    }

    fn line_from_pc(
        &self,
        _pc: u32,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Option<LineInfo> {
        self.by_pc
            .iter()
            .find(|info| {
                info.class_name == class_name
                    && info.method_name == method_name
                    && info.descriptor == descriptor
            })
            .cloned()
    }

    fn field_list(&self, class_name: &str, _include_inherited: bool) -> Option<Vec<FieldInfo>> {
        self.fields.get(class_name).cloned()
    }

    fn is_class_of(&self, class_name: &str, ancestor: &str) -> bool {
        class_name == ancestor
            || self
                .ancestors
                .iter()
                .any(|(class, base)| class == class_name && base == ancestor)
    }
}

fn line_info(
    class: &str,
    method: &str,
    descriptor: &str,
    pc: u32,
    line: u32,
    locals: Vec<LocalVar>,
) -> LineInfo {
    LineInfo {
        class_name: class.to_string(),
        method_name: method.to_string(),
        descriptor: descriptor.to_string(),
        pc,
        line,
        source_path: Some(format!("/src/{class}.java")),
        code_length: 100,
        locals,
    }
}

async fn connected_session(
    transport: Arc<MockTransport>,
    resolver: TestResolver,
) -> Arc<DebugSession> {
    let session =
        DebugSession::new(transport.clone(), Arc::new(resolver)).expect("fresh transport");
    session.connect().await.expect("mock connect");
    Arc::new(session)
}

#[tokio::test(start_paused = true)]
async fn breakpoint_add_sends_resolved_location() {
    let transport = MockTransport::new(Box::new(|cmd, payload| {
        assert_eq!(cmd, opcodes::ADD_BKP);

        let pc = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(pc, 42);
        let mut rest = &payload[4..];
        let (class, used) = parse_wire_string(rest).unwrap();
        rest = &rest[used..];
        let (method, used) = parse_wire_string(rest).unwrap();
        rest = &rest[used..];
        let (descriptor, used) = parse_wire_string(rest).unwrap();
        assert_eq!(class, "Foo");
        assert_eq!(method, "main");
        assert_eq!(descriptor, "([Ljava/lang/String;)V");
        assert_eq!(rest.len(), used, "trailing bytes after descriptor");

        vec![ok_frame(cmd, &[])]
    }));

    let resolver = TestResolver {
        by_line: vec![(
            10,
            "Foo.java".to_string(),
            line_info("Foo", "main", "([Ljava/lang/String;)V", 42, 10, Vec::new()),
        )],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    assert!(session.set_breakpoints(&[10], "Foo.java").await);

    let breakpoints = session.breakpoints().await;
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].line, 10);
    assert_eq!(breakpoints[0].pc, 42);
    assert_eq!(breakpoints[0].class_name, "Foo");

    // Same request again is already reconciled: no further frames
    assert!(session.set_breakpoints(&[10], "Foo.java").await);
    assert_eq!(transport.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unresolvable_line_fails_without_touching_target() {
    let transport = MockTransport::new(Box::new(|_, _| panic!("nothing should be sent")));
    let session = connected_session(transport.clone(), TestResolver::default()).await;

    assert!(!session.set_breakpoints(&[99], "Missing.java").await);
    assert!(session.breakpoints().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_on_exception_emits_once() {
    let mut polls = 0u32;
    let transport = MockTransport::new(Box::new(move |cmd, _| {
        assert_eq!(cmd, opcodes::READ_STATUS);
        polls += 1;
        // STOP | STOP_SET | EXCP on the first poll, latch cleared afterwards
        let status = if polls == 1 { 0x07 } else { 0x05 };
        vec![ok_frame(cmd, &[status])]
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    session.on_stop(Box::new(move |reason| {
        stop_tx.send(reason).ok();
    }));

    session.start_status_polling().await;

    let first = tokio::time::timeout(Duration::from_secs(5), stop_rx.recv())
        .await
        .expect("stop event after polling")
        .expect("channel open");
    assert_eq!(first, Some(StopReason::Exception));

    // Let several more polls run; the latch is clear and STOP is unchanged,
    // so no further event may fire
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(stop_rx.try_recv().is_err());

    session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn status_without_stop_set_needs_an_edge() {
    let mut polls = 0u32;
    let transport = MockTransport::new(Box::new(move |cmd, _| {
        assert_eq!(cmd, opcodes::READ_STATUS);
        polls += 1;
        // Running for two polls, then a plain STOP with no latch bit
        let status = if polls <= 2 { 0x00 } else { 0x01 };
        vec![ok_frame(cmd, &[status])]
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    session.on_stop(Box::new(move |reason| {
        stop_tx.send(reason).ok();
    }));

    session.start_status_polling().await;

    let first = tokio::time::timeout(Duration::from_secs(5), stop_rx.recv())
        .await
        .expect("stop after the edge")
        .expect("channel open");
    assert_eq!(first, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(stop_rx.try_recv().is_err(), "no stop without an edge");

    session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn reset_status_is_discarded() {
    let transport = MockTransport::new(Box::new(move |cmd, _| {
        assert_eq!(cmd, opcodes::READ_STATUS);
        // RESET set: target mid-reboot, the stop bits are garbage
        vec![ok_frame(cmd, &[0x83])]
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    session.on_stop(Box::new(move |reason| {
        stop_tx.send(reason).ok();
    }));

    session.start_status_polling().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(stop_rx.try_recv().is_err());
    assert!(!session.is_stopped().await);

    session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn console_output_reaches_stdout_hook() {
    let mut status_polls = 0u32;
    let transport = MockTransport::new(Box::new(move |cmd, _| match cmd {
        opcodes::READ_STATUS => {
            status_polls += 1;
            vec![ok_frame(cmd, &[0x08])]
        }
        opcodes::READ_CONSOLE => vec![ok_frame(cmd, b"hello from target\n")],
        other => panic!("unexpected command {other:#04x}"),
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    session.on_stdout(Box::new(move |text| {
        out_tx.send(text.to_string()).ok();
    }));

    session.start_status_polling().await;

    let text = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
        .await
        .expect("console output after polling")
        .expect("channel open");
    assert_eq!(text, "hello from target\n");

    session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn string_local_is_materialized_as_leaf() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::READ_STACK_TRACE => {
            assert_eq!(payload, &0u32.to_le_bytes()[..]);
            vec![ok_frame(
                cmd,
                &stack_trace_data(0x8000_0000, 5, "Greeter", "main", "()V"),
            )]
        }
        opcodes::READ_LOCAL => {
            // frame 0, narrow read, slot 1
            assert_eq!(&payload[..4], &0u32.to_le_bytes());
            assert_eq!(&payload[4..8], &1u32.to_le_bytes());
            vec![ok_frame(cmd, &slot_data(8, 0x1000, Some("java/lang/String")))]
        }
        opcodes::READ_FIELD => {
            let reference = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            assert_eq!(reference, 0x1000);
            let (field, _) = parse_wire_string(&payload[4..]).unwrap();
            match field.as_str() {
                "coder" => vec![ok_frame(cmd, &slot_data(1, 0, None))],
                "value" => vec![ok_frame(cmd, &slot_data(2, 0x2000, Some("[B")))],
                other => panic!("unexpected field {other}"),
            }
        }
        opcodes::READ_ARRAY => {
            assert_eq!(&payload[..4], &2u32.to_le_bytes(), "length");
            assert_eq!(&payload[4..8], &0u32.to_le_bytes(), "start");
            assert_eq!(&payload[8..12], &0x2000u32.to_le_bytes(), "reference");
            vec![ok_frame(cmd, &[0x48, 0x69])]
        }
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![line_info(
            "Greeter",
            "main",
            "()V",
            5,
            3,
            vec![LocalVar {
                name: "msg".to_string(),
                descriptor: "Ljava/lang/String;".to_string(),
                index: 1,
                start_pc: 0,
                length: 100,
            }],
        )],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let variables = session.read_local_variables(0).await.expect("locals");
    assert_eq!(
        variables,
        vec![Variable {
            name: "msg".to_string(),
            value: "\"Hi\"".to_string(),
            variables_reference: 0,
        }]
    );

    // Strings are leaves: the handle was never registered
    assert!(session.read_variable(0x1000).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn builder_string_decodes_utf16_up_to_count() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::READ_STACK_TRACE => vec![ok_frame(
            cmd,
            &stack_trace_data(0x8000_0000, 5, "Log", "main", "()V"),
        )],
        opcodes::READ_LOCAL => vec![ok_frame(
            cmd,
            &slot_data(24, 0x5000, Some("java/lang/StringBuilder")),
        )],
        opcodes::READ_FIELD => {
            let (field, _) = parse_wire_string(&payload[4..]).unwrap();
            match field.as_str() {
                "coder" => vec![ok_frame(cmd, &slot_data(1, 1, None))],
                // The backing array is larger than the live content
                "value" => vec![ok_frame(cmd, &slot_data(16, 0x6000, Some("[B")))],
                "count" => vec![ok_frame(cmd, &slot_data(4, 2, None))],
                other => panic!("unexpected field {other}"),
            }
        }
        opcodes::READ_ARRAY => {
            // count << coder bytes, not the full capacity
            assert_eq!(&payload[..4], &4u32.to_le_bytes(), "length");
            assert_eq!(&payload[8..12], &0x6000u32.to_le_bytes(), "reference");
            vec![ok_frame(cmd, &[0x48, 0x00, 0x69, 0x00])]
        }
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![line_info(
            "Log",
            "main",
            "()V",
            5,
            2,
            vec![LocalVar {
                name: "sb".to_string(),
                descriptor: "Ljava/lang/StringBuilder;".to_string(),
                index: 0,
                start_pc: 0,
                length: 100,
            }],
        )],
        ancestors: vec![(
            "java/lang/StringBuilder".to_string(),
            "java/lang/AbstractStringBuilder".to_string(),
        )],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let variables = session.read_local_variables(0).await.expect("locals");
    assert_eq!(
        variables,
        vec![Variable {
            name: "sb".to_string(),
            value: "\"Hi\"".to_string(),
            variables_reference: 0,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn mismatched_echo_is_skipped() {
    let transport = MockTransport::new(Box::new(|cmd, _| {
        assert_eq!(cmd, opcodes::SET_EXCP_MODE);
        // A stale reply sneaks in ahead of the real one; the gate must skip
        // it and still pair the right response
        vec![ok_frame(opcodes::STOP, &[]), ok_frame(cmd, &[])]
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;
    assert!(session.set_exception_breakpoints(true).await);
}

#[tokio::test(start_paused = true)]
async fn int_array_expands_by_handle() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::READ_STACK_TRACE => vec![ok_frame(
            cmd,
            &stack_trace_data(0x8000_0000, 7, "Arrays", "main", "()V"),
        )],
        opcodes::READ_LOCAL => vec![ok_frame(cmd, &slot_data(12, 0x3000, Some("[I")))],
        opcodes::READ_ARRAY => {
            assert_eq!(&payload[..4], &3u32.to_le_bytes(), "length = size / elem");
            assert_eq!(&payload[4..8], &0u32.to_le_bytes(), "start");
            assert_eq!(&payload[8..12], &0x3000u32.to_le_bytes(), "reference");
            vec![ok_frame(
                cmd,
                &[0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
            )]
        }
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![line_info(
            "Arrays",
            "main",
            "()V",
            7,
            4,
            vec![LocalVar {
                name: "nums".to_string(),
                descriptor: "[I".to_string(),
                index: 0,
                start_pc: 0,
                length: 100,
            }],
        )],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let locals = session.read_local_variables(0).await.expect("locals");
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].variables_reference, 0x3000);

    let elements = session.read_variable(0x3000).await.expect("expansion");
    assert_eq!(
        elements,
        vec![
            Variable { name: "[0]".into(), value: "1".into(), variables_reference: 0 },
            Variable { name: "[1]".into(), value: "2".into(), variables_reference: 0 },
            Variable { name: "[2]".into(), value: "-1".into(), variables_reference: 0 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_local_read_yields_placeholder() {
    let transport = MockTransport::new(Box::new(|cmd, _| match cmd {
        opcodes::READ_STACK_TRACE => vec![ok_frame(
            cmd,
            &stack_trace_data(0x8000_0000, 7, "Half", "main", "()V"),
        )],
        // No READ_LOCAL response at all: the read times out
        opcodes::READ_LOCAL => Vec::new(),
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![line_info(
            "Half",
            "main",
            "()V",
            7,
            4,
            vec![LocalVar {
                name: "x".to_string(),
                descriptor: "I".to_string(),
                index: 0,
                start_pc: 0,
                length: 100,
            }],
        )],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let locals = session.read_local_variables(0).await.expect("locals");
    assert_eq!(locals, vec![Variable::not_available("x")]);
}

#[tokio::test(start_paused = true)]
async fn install_chunks_and_progress() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::INSTALL_FILE => {
            let (name, _) = parse_wire_string(payload).unwrap();
            assert_eq!(name, "app.bin");
            vec![ok_frame(cmd, &[])]
        }
        opcodes::WRITE_FILE_DATA | opcodes::COMPLETE_INSTALL => vec![ok_frame(cmd, &[])],
        other => panic!("unexpected command {other:#04x}"),
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let progress: Arc<StdMutex<Vec<(usize, usize)>>> = Arc::default();
    let log = progress.clone();
    let data = vec![0xAB; 1025];
    let ok = session
        .install_file("app.bin", &data, Some(&move |sent, total| {
            log.lock().unwrap().push((sent, total));
        }))
        .await;
    assert!(ok);

    assert_eq!(
        *progress.lock().unwrap(),
        vec![(512, 1025), (1024, 1025), (1025, 1025), (1025, 1025)]
    );

    let chunk_sizes: Vec<usize> = transport
        .writes()
        .iter()
        .filter(|(cmd, _)| *cmd == opcodes::WRITE_FILE_DATA)
        .map(|(_, payload)| payload.len())
        .collect();
    assert_eq!(chunk_sizes, vec![512, 512, 1]);

    assert_eq!(
        transport.written_opcodes(),
        vec![
            opcodes::INSTALL_FILE,
            opcodes::WRITE_FILE_DATA,
            opcodes::WRITE_FILE_DATA,
            opcodes::WRITE_FILE_DATA,
            opcodes::COMPLETE_INSTALL,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn gate_serializes_concurrent_commands() {
    let transport = MockTransport::new(Box::new(|cmd, _| match cmd {
        // First command never gets an answer; it must retire via timeout
        // before the second one touches the wire
        opcodes::STOP => Vec::new(),
        opcodes::SET_EXCP_MODE => vec![ok_frame(cmd, &[])],
        other => panic!("unexpected command {other:#04x}"),
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.stop().await })
    };
    // Let the first command claim the gate and write its frame
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.written_opcodes(), vec![opcodes::STOP]);

    let second = session.set_exception_breakpoints(true).await;
    assert!(second);
    assert!(!first.await.unwrap());

    assert_eq!(
        transport.written_opcodes(),
        vec![opcodes::STOP, opcodes::SET_EXCP_MODE]
    );
}

#[tokio::test(start_paused = true)]
async fn run_is_a_noop_while_running() {
    let transport = MockTransport::new(Box::new(|_, _| panic!("nothing should be sent")));
    let session = connected_session(transport.clone(), TestResolver::default()).await;

    assert!(session.run().await);
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exception_info_parses_type_and_message() {
    let transport = MockTransport::new(Box::new(|cmd, _| {
        assert_eq!(cmd, opcodes::READ_EXCP_INFO);
        let mut data = sized_str("java/lang/ArithmeticException", true);
        data.extend_from_slice(&sized_str("/ by zero", true));
        vec![ok_frame(cmd, &data)]
    }));

    let session = connected_session(transport.clone(), TestResolver::default()).await;

    let info = session.read_exception_info().await.expect("exception info");
    assert_eq!(info.type_name, "java/lang/ArithmeticException");
    assert_eq!(info.message, "/ by zero");
}

#[tokio::test(start_paused = true)]
async fn object_expansion_reads_fields_with_placeholders() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::READ_STACK_TRACE => vec![ok_frame(
            cmd,
            &stack_trace_data(0x8000_0000, 9, "Shapes", "main", "()V"),
        )],
        opcodes::READ_LOCAL => vec![ok_frame(cmd, &slot_data(16, 0x4000, Some("Point")))],
        opcodes::READ_FIELD => {
            let (field, _) = parse_wire_string(&payload[4..]).unwrap();
            match field.as_str() {
                "x" => vec![ok_frame(cmd, &slot_data(4, 3, None))],
                // y never answers: placeholder, not batch failure
                "y" => Vec::new(),
                other => panic!("unexpected field {other}"),
            }
        }
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![line_info(
            "Shapes",
            "main",
            "()V",
            9,
            6,
            vec![LocalVar {
                name: "p".to_string(),
                descriptor: "LPoint;".to_string(),
                index: 0,
                start_pc: 0,
                length: 100,
            }],
        )],
        fields: HashMap::from([(
            "Point".to_string(),
            vec![
                FieldInfo { name: "x".into(), descriptor: "I".into(), access_flags: 0 },
                FieldInfo { name: "y".into(), descriptor: "I".into(), access_flags: 0 },
                FieldInfo { name: "COUNT".into(), descriptor: "I".into(), access_flags: 0x0008 },
            ],
        )]),
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let locals = session.read_local_variables(0).await.expect("locals");
    assert_eq!(locals[0].variables_reference, 0x4000);

    let fields = session.read_variable(0x4000).await.expect("expansion");
    assert_eq!(
        fields,
        vec![
            Variable { name: "x".into(), value: "3".into(), variables_reference: 0 },
            Variable::not_available("y"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stack_walk_stops_at_end_frame_and_is_cached() {
    let transport = MockTransport::new(Box::new(|cmd, payload| match cmd {
        opcodes::READ_STACK_TRACE => {
            let frame_id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            match frame_id {
                0 => vec![ok_frame(cmd, &stack_trace_data(0, 5, "Inner", "calc", "(I)I"))],
                1 => vec![ok_frame(
                    cmd,
                    &stack_trace_data(1 | 0x8000_0000, 20, "Outer", "main", "()V"),
                )],
                other => panic!("unexpected frame {other}"),
            }
        }
        other => panic!("unexpected command {other:#04x}"),
    }));

    let resolver = TestResolver {
        by_pc: vec![
            line_info("Inner", "calc", "(I)I", 5, 12, Vec::new()),
            line_info("Outer", "main", "()V", 20, 30, Vec::new()),
        ],
        ..Default::default()
    };
    let session = connected_session(transport.clone(), resolver).await;

    let frames = session.stack_frames().await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].name, "Inner.calc(int)");
    assert_eq!(frames[1].name, "Outer.main()");
    assert_eq!(frames[0].instruction_pointer_reference, "5");

    let before = transport.writes().len();
    let again = session.stack_frames().await;
    assert_eq!(again, frames);
    assert_eq!(transport.writes().len(), before, "second walk served from cache");
}
