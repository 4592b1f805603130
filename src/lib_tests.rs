//! End-to-end scenarios: the client facade driven over real framing layers
//! against scripted peers.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::association::{
    AareApdu, ApplicationContextName, Conformance, InitiateResponse,
};
use crate::client::sync::{ClientBuilder, ClientSettings, DlmsClient};
use crate::cosem::CosemAttribute;
use crate::data::Data;
use crate::get::{GetDataResult, GetResponse, GetResponseNormal};
use crate::hdlc::connection::{HdlcLink, HdlcSettings};
use crate::hdlc::frame::{Control, HdlcFrame, LLC_RESPONSE};
use crate::hdlc::{HdlcAddress, reserved};
use crate::obis_code::ObisCode;
use crate::transport::Transport;
use crate::wrapper::{WRAPPER_HEADER_LEN, WrapperHeader, WrapperTransport};

/// Raw byte stream handing out scripted chunks, recording everything sent.
#[derive(Debug, Default)]
struct ScriptedStream {
    rx: VecDeque<u8>,
    chunk_sizes: VecDeque<usize>,
    tx: Vec<u8>,
}

impl Transport for ScriptedStream {
    type Error = ();

    fn send(&mut self, data: &[u8]) -> Result<(), ()> {
        self.tx.extend_from_slice(data);
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, ()> {
        if self.rx.is_empty() {
            return Ok(0);
        }
        let chunk = self.chunk_sizes.pop_front().unwrap_or(usize::MAX);
        let n = chunk.min(buffer.len()).min(self.rx.len());
        for slot in buffer.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

fn wrapper_framed(source: u16, destination: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = WrapperHeader {
        source_wport: source,
        destination_wport: destination,
        length: payload.len() as u16,
    }
    .encode()
    .to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn accepted_aare(conformance: Conformance, pdu: u16) -> Vec<u8> {
    AareApdu::new_accepted(
        ApplicationContextName::LogicalNameReferencing,
        InitiateResponse::new(conformance, pdu),
    )
    .encode()
}

fn invocation_counter_attribute() -> CosemAttribute {
    CosemAttribute::new(15, ObisCode::new(0, 0, 0x2b, 1, 0, 255), 2)
}

/// Plain GET of 0-0:43.1.0.255 attribute 2 over DLMS-over-TCP, checked at
/// the wire level.
#[test]
fn test_plain_get_over_wrapper() {
    let get_response = GetResponse::Normal(GetResponseNormal {
        invoke_id: 0xc1,
        result: GetDataResult::Data(Data::DoubleLongUnsigned(1)),
    })
    .encode();

    let mut stream = ScriptedStream::default();
    stream.rx.extend(wrapper_framed(
        0x0001,
        0x0010,
        &accepted_aare(Conformance::CLIENT_LN, 0x0400),
    ));
    stream.rx.extend(wrapper_framed(0x0001, 0x0010, &get_response));

    let transport = WrapperTransport::new(stream, 0x0010, 0x0001);
    let mut client: DlmsClient<_, Vec<u8>> =
        ClientBuilder::new(transport, ClientSettings::default()).build_with_heap(4096);

    client.associate().unwrap();
    let value = client.get(invocation_counter_attribute(), None).unwrap();
    assert_eq!(value, Data::DoubleLongUnsigned(1));

    // wire check on the GET request: wrapper header then the APDU
    let tx = &client.transport_mut().inner_mut().tx;
    let request_at = tx.len() - (WRAPPER_HEADER_LEN + 13);
    assert_eq!(
        &tx[request_at..],
        &[
            0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x0d, // wrapper header
            0xc0, 0x01, 0xc1, // GET-Request-Normal, invoke 0xC1
            0x00, 0x0f, // class 15
            0x00, 0x00, 0x2b, 0x01, 0x00, 0xff, // 0-0:43.1.0.255
            0x02, // attribute 2
            0x00, // no access selection
        ]
    );
}

/// Wrapper reads survive arbitrary TCP chunking (64 + 64 + 72 of a 200-byte
/// payload).
#[test]
fn test_wrapper_partial_reads_end_to_end() {
    // a GET response carrying a 190-byte octet string: 200 payload bytes
    let mut value = alloc::vec![0x09, 0x81, 190];
    value.extend(core::iter::repeat_n(0x5a, 190));
    let mut response = alloc::vec![0xc4, 0x01, 0xc1, 0x00];
    response.extend_from_slice(&value);
    assert_eq!(response.len(), 197);

    let mut stream = ScriptedStream::default();
    stream.rx.extend(wrapper_framed(
        0x0001,
        0x0010,
        &accepted_aare(Conformance::CLIENT_LN, 0x0400),
    ));
    stream.rx.extend(wrapper_framed(0x0001, 0x0010, &response));
    // AARE in one read, then the response header + 64/64/72 split
    stream.chunk_sizes.extend([usize::MAX, 8, 64, 64, 72]);

    let transport = WrapperTransport::new(stream, 0x0010, 0x0001);
    let mut client: DlmsClient<_, Vec<u8>> =
        ClientBuilder::new(transport, ClientSettings::default()).build_with_heap(4096);

    client.associate().unwrap();
    let data = client.get(invocation_counter_attribute(), None).unwrap();
    assert_eq!(data, Data::OctetString(alloc::vec![0x5a; 190]));
}

/// Full stack over HDLC: SNRM/UA, then AARQ/AARE and a GET inside
/// sequenced I-frames.
#[test]
fn test_association_and_get_over_hdlc() {
    fn server_frame(control: Control, information: Vec<u8>) -> Vec<u8> {
        HdlcFrame::new(
            HdlcAddress::new(reserved::CLIENT_PUBLIC).unwrap(),
            HdlcAddress::new(reserved::SERVER_MANAGEMENT_LOGICAL_DEVICE).unwrap(),
            control,
            false,
            information,
        )
        .encode()
    }

    fn server_response(ns: u8, nr: u8, apdu: &[u8]) -> Vec<u8> {
        let mut information = LLC_RESPONSE.to_vec();
        information.extend_from_slice(apdu);
        server_frame(
            Control::Information { send_sequence: ns, receive_sequence: nr, poll_final: true },
            information,
        )
    }

    let get_response = GetResponse::Normal(GetResponseNormal {
        invoke_id: 0xc1,
        result: GetDataResult::Data(Data::LongUnsigned(0x1234)),
    })
    .encode();

    let mut stream = ScriptedStream::default();
    stream
        .rx
        .extend(server_frame(Control::UnnumberedAcknowledge { poll_final: true }, Vec::new()));
    stream.rx.extend(server_response(0, 1, &accepted_aare(Conformance::CLIENT_LN, 0x0400)));
    stream.rx.extend(server_response(1, 2, &get_response));

    let mut link = HdlcLink::new(stream, HdlcSettings::default());
    link.connect().unwrap();

    let mut client: DlmsClient<_, Vec<u8>> =
        ClientBuilder::new(link, ClientSettings::default()).build_with_heap(4096);
    client.associate().unwrap();

    let value = client.get(invocation_counter_attribute(), None).unwrap();
    assert_eq!(value, Data::LongUnsigned(0x1234));

    // every outbound frame is flag-delimited and parseable
    let tx = client.transport_mut().transport_mut().tx.clone();
    let mut rest = &tx[..];
    let mut controls = Vec::new();
    while !rest.is_empty() {
        let (next, frame) = HdlcFrame::parse(rest).unwrap();
        controls.push(frame.control);
        rest = next;
    }
    assert_eq!(
        controls,
        [
            Control::Snrm { poll_final: true },
            Control::Information { send_sequence: 0, receive_sequence: 0, poll_final: true },
            Control::Information { send_sequence: 1, receive_sequence: 1, poll_final: true },
        ]
    );
}
