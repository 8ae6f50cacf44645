//! End-to-end session against a loopback IEC 104 server.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_util::codec::Framed;

use voltage_iec104_driver::{
    Apci, Apdu, Asdu, AsduHeader, ConnectionState, Cot, DriverConfig, Iec104Codec, Iec104Driver,
    QualityLevel, TypeId, UFunction,
};

type Server = Framed<TcpStream, Iec104Codec>;

const WAIT: Duration = Duration::from_secs(2);

async fn accept(listener: TcpListener) -> Server {
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = Framed::new(stream, Iec104Codec::new());

    let start = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(start, Apdu::u_frame(UFunction::StartDtAct));
    server.send(Apdu::u_frame(UFunction::StartDtCon)).await.unwrap();
    server
}

/// Next I-frame from the client, skipping supervisory and test frames.
async fn next_i_frame(server: &mut Server) -> (u16, u16, Asdu) {
    loop {
        let apdu = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => return (send_seq, recv_seq, apdu.asdu.unwrap()),
            Apci::UFrame {
                function: UFunction::TestFrAct,
            } => server.send(Apdu::u_frame(UFunction::TestFrCon)).await.unwrap(),
            _ => {}
        }
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_interrogation_write_and_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepting = tokio::spawn(accept(listener));

    let driver = Iec104Driver::new(DriverConfig::default());
    let identity = format!("127.0.0.1|{port}|1|2000|12|8|settledelay=0;autoreconnect=false");
    assert_ok!(driver.add_device("rtu", &identity));
    assert_ok!(driver.connect("rtu").await);
    assert_eq!(driver.state("rtu").unwrap(), ConnectionState::Connected);

    let mut server = accepting.await.unwrap();

    // ==================== Interrogation ====================

    let (send_seq, _, gi) = next_i_frame(&mut server).await;
    assert_eq!(send_seq, 0);
    assert_eq!(gi.type_id(), TypeId::InterrogationCommand);
    assert_eq!(gi.header.cot, Cot::Activation);
    assert_eq!(gi.header.common_address, 1);

    let mut confirm = gi.clone();
    confirm.header.cot = Cot::ActivationConfirm;
    server.send(Apdu::i_frame(0, 1, confirm)).await.unwrap();

    // IOA 2001, 23.5, QDS good
    let mut body = vec![0xD1, 0x07, 0x00];
    body.extend_from_slice(&23.5f32.to_le_bytes());
    body.push(0x00);
    let measured = Asdu::new(
        AsduHeader::new(TypeId::MeasuredFloat, Cot::InterrogatedByStation, 1),
        Bytes::from(body),
    );
    server.send(Apdu::i_frame(1, 1, measured)).await.unwrap();

    let mut terminate = gi;
    terminate.header.cot = Cot::ActivationTermination;
    server.send(Apdu::i_frame(2, 1, terminate)).await.unwrap();

    wait_for(|| driver.read("rtu", 2001).is_some()).await;
    let reading = driver.read("rtu", 2001).unwrap();
    assert_eq!(reading.value.as_deref(), Some("23.500000"));
    assert_eq!(reading.quality, QualityLevel::Good);

    let tag = driver.read_tag("rtu", "2001", "ME_NC");
    assert_eq!(tag.value.as_deref(), Some("23.500000"));

    // ==================== Write ====================

    assert_ok!(driver.write_tag("rtu", "6001", "Setpoint", "12.5").await);

    let (send_seq, recv_seq, command) = next_i_frame(&mut server).await;
    assert_eq!(send_seq, 1);
    assert_eq!(recv_seq, 3);
    assert_eq!(command.type_id(), TypeId::SetpointFloat);
    assert_eq!(command.header.cot, Cot::Activation);
    let mut expected = vec![0x71, 0x17, 0x00];
    expected.extend_from_slice(&12.5f32.to_le_bytes());
    expected.push(0x00);
    assert_eq!(command.body.as_ref(), expected.as_slice());

    // ==================== Peer Close ====================

    drop(server);
    wait_for(|| driver.state("rtu").ok() == Some(ConnectionState::Disconnected)).await;

    // values outlive the session
    assert!(driver.read("rtu", 2001).is_some());

    driver.shutdown().await;
    assert!(driver.device_keys().is_empty());
    assert!(driver.read("rtu", 2001).is_none());
}

#[tokio::test]
async fn test_refused_connection_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let driver = Iec104Driver::new(DriverConfig::default());
    let identity = format!("127.0.0.1|{port}|1|500|||autointerrogation=false;connectretries=1");
    assert_ok!(driver.add_device("rtu", &identity));

    let err = driver.connect("rtu").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(driver.state("rtu").unwrap(), ConnectionState::Idle);
}
