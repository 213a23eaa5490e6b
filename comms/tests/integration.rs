use comms::msg::{Command, Msg, Payload};
use tokio::io;

fn duplex_pair() -> (
    (
        comms::OnoReceiver<io::ReadHalf<io::DuplexStream>>,
        comms::OnoSender<io::WriteHalf<io::DuplexStream>>,
    ),
    (
        comms::OnoReceiver<io::ReadHalf<io::DuplexStream>>,
        comms::OnoSender<io::WriteHalf<io::DuplexStream>>,
    ),
) {
    let (one, two) = io::duplex(4096);
    let (rx1, tx1) = io::split(one);
    let (rx2, tx2) = io::split(two);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

#[tokio::test]
async fn send_recv_control() {
    let ((_, mut tx), (mut rx, _)) = duplex_pair();

    let msg = Msg::Control(Command::Welcome { world_size: 2 });
    tx.send(&msg).await.unwrap();

    let received: Msg = rx.recv().await.unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn send_recv_weights_into_buffer() {
    let ((_, mut tx), (mut rx, _)) = duplex_pair();

    let weights: Vec<f32> = (0..300).map(|i| i as f32 * 0.5).collect();
    tx.send(&Msg::Data(Payload::Weights(&weights))).await.unwrap();

    let mut buf: Vec<f32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Weights(received)) => assert_eq!(received, weights.as_slice()),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn messages_keep_their_order() {
    let ((_, mut tx), (mut rx, _)) = duplex_pair();

    let tx_task = tokio::spawn(async move {
        tx.send(&Msg::Control(Command::Barrier)).await?;
        tx.send(&Msg::Data(Payload::Reduced(&[1.0, 2.0]))).await?;
        tx.send(&Msg::Err("rank failed".into())).await?;
        tx.send(&Msg::Control(Command::Disconnect)).await
    });

    assert_eq!(rx.recv::<Msg>().await.unwrap(), Msg::Control(Command::Barrier));
    assert_eq!(
        rx.recv::<Msg>().await.unwrap(),
        Msg::Data(Payload::Reduced(&[1.0, 2.0]))
    );
    assert_eq!(rx.recv::<Msg>().await.unwrap(), Msg::Err("rank failed".into()));
    assert_eq!(
        rx.recv::<Msg>().await.unwrap(),
        Msg::Control(Command::Disconnect)
    );

    tx_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let ((_, mut tx), (mut rx, _)) = duplex_pair();
    tx.shutdown().await.unwrap();

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn oversized_frame_header_is_rejected() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, peer) = io::duplex(64);
    let (rx, tx) = io::split(peer);
    let (mut rx, _tx) = comms::channel(rx, tx);

    raw.write_all(&(u64::MAX).to_be_bytes()).await.unwrap();

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
