//! Unit tests for the newline-delimited frame codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use cli_plugin_host::protocol::codec::{FrameCodec, MAX_FRAME_BYTES};
use cli_plugin_host::AppError;

#[test]
fn complete_line_is_decoded_without_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"exec\"}\n");

    let frame = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(frame.as_deref(), Some("{\"method\":\"exec\"}"));
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"stdout\":[104,");

    assert_eq!(codec.decode(&mut buf).expect("partial decode"), None);

    buf.extend_from_slice(b"105]}\n");
    let frame = codec.decode(&mut buf).expect("second decode");
    assert_eq!(frame.as_deref(), Some("{\"stdout\":[104,105]}"));
}

#[test]
fn batched_lines_decode_one_at_a_time() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{}\n{\"a\":1}\n");

    assert_eq!(codec.decode(&mut buf).expect("first").as_deref(), Some("{}"));
    assert_eq!(codec.decode(&mut buf).expect("second").as_deref(), Some("{\"a\":1}"));
    assert_eq!(codec.decode(&mut buf).expect("third"), None);
}

#[test]
fn unterminated_line_is_returned_at_eof() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"tail\":true}");

    let frame = codec.decode_eof(&mut buf).expect("decode_eof");

    assert_eq!(frame.as_deref(), Some("{\"tail\":true}"));
}

#[test]
fn overlong_frame_is_a_stream_error() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_BYTES + 1].as_slice());

    let result = codec.decode(&mut buf);

    assert!(
        matches!(result, Err(AppError::Stream(ref msg)) if msg.starts_with("frame too long")),
        "got {result:?}"
    );
}

#[test]
fn encoder_appends_newline() {
    let mut codec = FrameCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("{\"method\":\"exec_simple\"}".to_owned(), &mut dst)
        .expect("encode must succeed");

    assert_eq!(&dst[..], b"{\"method\":\"exec_simple\"}\n");
}
