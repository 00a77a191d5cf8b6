//! Framing and codec tests

mod common;

use parkgate_core::protocol::{
    commands::encode_command, Command, Discriminator, Envelope, LineFramer, ProtocolError,
};
use pretty_assertions::assert_eq;

const STREAM: &[u8] = b"{\"tipo\":\"INICIO_SISTEMA\",\"version\":\"2.1\"}\r\n\n  \n\
{\"evento\":\"VEHICULO_ENTRADA\",\"timestamp\":1000}\n{\"tipo\":\"ESTADO_COMPL";

fn reassemble(frames: &[Vec<u8>], pending: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(frame);
        out.push(b'\n');
    }
    out.extend_from_slice(pending);
    out
}

#[test]
fn test_raw_frames_reconstruct_input_for_every_chunk_size() {
    for chunk_size in 1..=STREAM.len() {
        let mut framer = LineFramer::new();
        let mut frames = Vec::new();
        for chunk in STREAM.chunks(chunk_size) {
            frames.extend(framer.push_raw(chunk));
        }
        assert_eq!(
            reassemble(&frames, framer.pending()),
            STREAM.to_vec(),
            "chunk size {}",
            chunk_size
        );
    }
}

#[test]
fn test_raw_frames_reconstruct_input_for_uneven_splits() {
    for split in 0..STREAM.len() {
        let mut framer = LineFramer::new();
        let mut frames = framer.push_raw(&STREAM[..split]);
        frames.extend(framer.push_raw(&STREAM[split..]));
        assert_eq!(reassemble(&frames, framer.pending()), STREAM.to_vec());
    }
}

#[test]
fn test_lines_are_trimmed_and_blank_lines_dropped() {
    let mut framer = LineFramer::new();
    let lines: Vec<String> = framer.push(STREAM).into_iter().map(Result::unwrap).collect();
    assert_eq!(
        lines,
        vec![
            "{\"tipo\":\"INICIO_SISTEMA\",\"version\":\"2.1\"}".to_string(),
            "{\"evento\":\"VEHICULO_ENTRADA\",\"timestamp\":1000}".to_string(),
        ]
    );
    assert_eq!(framer.pending(), b"{\"tipo\":\"ESTADO_COMPL");

    let lines: Vec<String> = framer
        .push(b"ETO\",\"estado\":\"ESPERANDO\"}\n")
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(
        lines,
        vec!["{\"tipo\":\"ESTADO_COMPLETO\",\"estado\":\"ESPERANDO\"}".to_string()]
    );
    assert!(framer.pending().is_empty());
}

#[test]
fn test_envelope_reencode_preserves_fields() {
    let line = r#"{"tipo":"CAMBIO_ESTADO","estado_anterior":"ESPERANDO","estado_nuevo":"PROCESANDO","timestamp":4242,"extra":{"a":[1,2]},"ok":true}"#;
    let env = Envelope::decode(line).unwrap();
    let again = Envelope::decode(&env.encode()).unwrap();

    assert_eq!(again, env);
    assert_eq!(
        again.discriminator(),
        &Discriminator::Tipo("CAMBIO_ESTADO".to_string())
    );
    assert_eq!(again.get_i64("timestamp"), Some(4242));
    assert_eq!(again.get_bool("ok"), Some(true));
    assert_eq!(again.fields().len(), 5);
}

#[test]
fn test_decode_failures_keep_the_line() {
    for line in [
        "not json",
        "[1,2,3]",
        r#"{"estado":"ESPERANDO"}"#,
        r#"{"tipo":"A","evento":"B"}"#,
    ] {
        match Envelope::decode(line) {
            Err(ProtocolError::Decode { line: kept, .. }) => assert_eq!(kept, line),
            other => panic!("expected decode error for {}, got {:?}", line, other),
        }
    }
}

#[test]
fn test_commands_are_uppercased_and_terminated() {
    assert_eq!(encode_command("status"), "STATUS\n");
    assert_eq!(encode_command("  vek_diag "), "VEK_DIAG\n");
    assert_eq!(Command::Reset.encode(), "RESET\n");
    assert_eq!(Command::Help.to_string(), "HELP");
}
