use bytes::Bytes;

use crate::error::Error;
use crate::frame::Frame;

/// Wire tag identifying a packet kind.
///
/// Tags below 100 are client/server handshake and channel-lifecycle
/// packets; `response` is assigned tag 100 to leave room for the
/// administrative/peer-cluster packets (101-204) of the original wire
/// format, which this agent never sends or receives and therefore does
/// not assign a variant to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PacketType {
    Null = 0,
    RequestJoin = 1,
    RequestIdentify = 2,
    Welcome = 3,
    Log = 4,
    RequestSend = 5,
    Route = 6,
    Ping = 7,
    Pong = 8,
    SetIdentity = 9,
    RequestOpen = 10,
    RequestClose = 11,
    RequestCloseAll = 12,
    KeepAlive = 13,
    NotifyOpen = 14,
    RequestLogin = 15,
    Instruction = 16,
    NotifyLoginSuccess = 17,
    NotifyLoginFail = 18,
    NotifyClose = 19,
    RequestLeave = 20,
    RouteControl = 21,
    RequestSendControl = 22,
    Response = 100,
}

/// A typed M2M packet.
///
/// Each variant carries exactly the fields the corresponding wire tag
/// defines, in wire order. [`Packet::encode_binary`] / [`Packet::from_bytes`]
/// are the only two places that need to know about the bencode frame shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Null,
    RequestJoin,
    RequestIdentify { uuid: Bytes },
    Welcome,
    Log { text: Bytes },
    RequestSend { channel: u32, data: Bytes },
    Route { channel: u32, data: Bytes },
    Ping { data: Bytes },
    Pong { data: Bytes },
    SetIdentity { uuid: Bytes },
    RequestOpen { channel: u32 },
    RequestClose { channel: u32 },
    RequestCloseAll,
    KeepAlive,
    NotifyOpen { channel: u32 },
    RequestLogin { username: Bytes, password: Bytes },
    Instruction { sender: Bytes, data: Frame },
    NotifyLoginSuccess { user: Bytes },
    NotifyLoginFail { message: Bytes },
    NotifyClose { channel: u32 },
    RequestLeave,
    RouteControl { channel: u32, data: Bytes },
    RequestSendControl { channel: u32, data: Bytes },
    Response { command_id: i64, result: Frame },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        use Packet::*;
        match self {
            Null => PacketType::Null,
            RequestJoin => PacketType::RequestJoin,
            RequestIdentify { .. } => PacketType::RequestIdentify,
            Welcome => PacketType::Welcome,
            Log { .. } => PacketType::Log,
            RequestSend { .. } => PacketType::RequestSend,
            Route { .. } => PacketType::Route,
            Ping { .. } => PacketType::Ping,
            Pong { .. } => PacketType::Pong,
            SetIdentity { .. } => PacketType::SetIdentity,
            RequestOpen { .. } => PacketType::RequestOpen,
            RequestClose { .. } => PacketType::RequestClose,
            RequestCloseAll => PacketType::RequestCloseAll,
            KeepAlive => PacketType::KeepAlive,
            NotifyOpen { .. } => PacketType::NotifyOpen,
            RequestLogin { .. } => PacketType::RequestLogin,
            Instruction { .. } => PacketType::Instruction,
            NotifyLoginSuccess { .. } => PacketType::NotifyLoginSuccess,
            NotifyLoginFail { .. } => PacketType::NotifyLoginFail,
            NotifyClose { .. } => PacketType::NotifyClose,
            RequestLeave => PacketType::RequestLeave,
            RouteControl { .. } => PacketType::RouteControl,
            RequestSendControl { .. } => PacketType::RequestSendControl,
            Response { .. } => PacketType::Response,
        }
    }

    /// Encode the packet's type tag and fields into a [`Frame::List`].
    pub fn encode(&self) -> Frame {
        use Packet::*;
        let tag = Frame::Int(self.packet_type() as i64);
        let fields: Vec<Frame> = match self {
            Null | RequestJoin | Welcome | RequestCloseAll | KeepAlive | RequestLeave => {
                vec![]
            }
            RequestIdentify { uuid } | SetIdentity { uuid } => {
                vec![Frame::Bytes(uuid.clone())]
            }
            Log { text } => vec![Frame::Bytes(text.clone())],
            RequestSend { channel, data }
            | Route { channel, data }
            | RouteControl { channel, data }
            | RequestSendControl { channel, data } => {
                vec![Frame::Int(*channel as i64), Frame::Bytes(data.clone())]
            }
            Ping { data } | Pong { data } => vec![Frame::Bytes(data.clone())],
            RequestOpen { channel } | RequestClose { channel } | NotifyOpen { channel }
            | NotifyClose { channel } => vec![Frame::Int(*channel as i64)],
            RequestLogin { username, password } => {
                vec![Frame::Bytes(username.clone()), Frame::Bytes(password.clone())]
            }
            Instruction { sender, data } => vec![Frame::Bytes(sender.clone()), data.clone()],
            NotifyLoginSuccess { user } => vec![Frame::Bytes(user.clone())],
            NotifyLoginFail { message } => vec![Frame::Bytes(message.clone())],
            Response { command_id, result } => vec![Frame::Int(*command_id), result.clone()],
        };
        let mut list = Vec::with_capacity(fields.len() + 1);
        list.push(tag);
        list.extend(fields);
        Frame::List(list)
    }

    /// Encode the packet to its final bencoded byte representation.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use m2m_codec::packet::Packet;
    ///
    /// let packet = Packet::Ping { data: Bytes::from_static(b"hi") };
    /// let bytes = packet.encode_binary();
    /// assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    /// ```
    pub fn encode_binary(&self) -> Bytes {
        self.encode().encode()
    }

    /// Decode a packet from a [`Frame`] already produced by [`Frame::decode`].
    pub fn from_frame(frame: &Frame) -> Result<Packet, Error> {
        let list = frame.as_list().ok_or(Error::NotAList)?;
        let (tag_frame, body) = list.split_first().ok_or(Error::MissingField("type"))?;
        let tag = tag_frame.as_int().ok_or(Error::WrongFieldType("type"))?;
        let mut r = Fields::new(body);

        Ok(match tag {
            t if t == PacketType::Null as i64 => Packet::Null,
            t if t == PacketType::RequestJoin as i64 => Packet::RequestJoin,
            t if t == PacketType::RequestIdentify as i64 => Packet::RequestIdentify {
                uuid: r.bytes("uuid")?,
            },
            t if t == PacketType::Welcome as i64 => Packet::Welcome,
            t if t == PacketType::Log as i64 => Packet::Log { text: r.bytes("text")? },
            t if t == PacketType::RequestSend as i64 => Packet::RequestSend {
                channel: r.channel("channel")?,
                data: r.bytes("data")?,
            },
            t if t == PacketType::Route as i64 => Packet::Route {
                channel: r.channel("channel")?,
                data: r.bytes("data")?,
            },
            t if t == PacketType::Ping as i64 => Packet::Ping { data: r.bytes("data")? },
            t if t == PacketType::Pong as i64 => Packet::Pong { data: r.bytes("data")? },
            t if t == PacketType::SetIdentity as i64 => Packet::SetIdentity {
                uuid: r.bytes("uuid")?,
            },
            t if t == PacketType::RequestOpen as i64 => Packet::RequestOpen {
                channel: r.channel("channel")?,
            },
            t if t == PacketType::RequestClose as i64 => Packet::RequestClose {
                channel: r.channel("channel")?,
            },
            t if t == PacketType::RequestCloseAll as i64 => Packet::RequestCloseAll,
            t if t == PacketType::KeepAlive as i64 => Packet::KeepAlive,
            t if t == PacketType::NotifyOpen as i64 => Packet::NotifyOpen {
                channel: r.channel("channel")?,
            },
            t if t == PacketType::RequestLogin as i64 => Packet::RequestLogin {
                username: r.bytes("username")?,
                password: r.bytes("password")?,
            },
            t if t == PacketType::Instruction as i64 => Packet::Instruction {
                sender: r.bytes("sender")?,
                data: r.any("data")?,
            },
            t if t == PacketType::NotifyLoginSuccess as i64 => Packet::NotifyLoginSuccess {
                user: r.bytes("user")?,
            },
            t if t == PacketType::NotifyLoginFail as i64 => Packet::NotifyLoginFail {
                message: r.bytes("message")?,
            },
            t if t == PacketType::NotifyClose as i64 => Packet::NotifyClose {
                channel: r.channel("channel")?,
            },
            t if t == PacketType::RequestLeave as i64 => Packet::RequestLeave,
            t if t == PacketType::RouteControl as i64 => Packet::RouteControl {
                channel: r.channel("channel")?,
                data: r.bytes("data")?,
            },
            t if t == PacketType::RequestSendControl as i64 => Packet::RequestSendControl {
                channel: r.channel("channel")?,
                data: r.bytes("data")?,
            },
            t if t == PacketType::Response as i64 => Packet::Response {
                command_id: r.int("command_id")?,
                result: r.any("result")?,
            },
            other => return Err(Error::UnknownTag(other)),
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Packet, Error> {
        let frame = Frame::decode(data)?;
        Packet::from_frame(&frame)
    }
}

/// Positional-field reader over a packet body, tracking which slot is next.
struct Fields<'a> {
    body: &'a [Frame],
    idx: usize,
}

impl<'a> Fields<'a> {
    fn new(body: &'a [Frame]) -> Self {
        Fields { body, idx: 0 }
    }

    fn next(&mut self, name: &'static str) -> Result<&'a Frame, Error> {
        let f = self.body.get(self.idx).ok_or(Error::MissingField(name))?;
        self.idx += 1;
        Ok(f)
    }

    fn bytes(&mut self, name: &'static str) -> Result<Bytes, Error> {
        self.next(name)?.as_bytes().cloned().ok_or(Error::WrongFieldType(name))
    }

    fn int(&mut self, name: &'static str) -> Result<i64, Error> {
        self.next(name)?.as_int().ok_or(Error::WrongFieldType(name))
    }

    fn channel(&mut self, name: &'static str) -> Result<u32, Error> {
        let n = self.int(name)?;
        u32::try_from(n).map_err(|_| Error::WrongFieldType(name))
    }

    fn any(&mut self, name: &'static str) -> Result<Frame, Error> {
        self.next(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let bytes = packet.encode_binary();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn roundtrips_every_kind() {
        roundtrip(Packet::Null);
        roundtrip(Packet::RequestJoin);
        roundtrip(Packet::RequestIdentify { uuid: Bytes::from_static(b"abc") });
        roundtrip(Packet::Welcome);
        roundtrip(Packet::Log { text: Bytes::from_static(b"hello") });
        roundtrip(Packet::RequestSend { channel: 3, data: Bytes::from_static(b"x") });
        roundtrip(Packet::Route { channel: 3, data: Bytes::from_static(b"y") });
        roundtrip(Packet::Ping { data: Bytes::from_static(b"p") });
        roundtrip(Packet::Pong { data: Bytes::from_static(b"p") });
        roundtrip(Packet::SetIdentity { uuid: Bytes::from_static(b"abc") });
        roundtrip(Packet::RequestOpen { channel: 1 });
        roundtrip(Packet::RequestClose { channel: 1 });
        roundtrip(Packet::RequestCloseAll);
        roundtrip(Packet::KeepAlive);
        roundtrip(Packet::NotifyOpen { channel: 2 });
        roundtrip(Packet::RequestLogin {
            username: Bytes::from_static(b"u"),
            password: Bytes::from_static(b"p"),
        });
        roundtrip(Packet::Instruction {
            sender: Bytes::from_static(b"srv"),
            data: Frame::Map(Default::default()),
        });
        roundtrip(Packet::NotifyLoginSuccess { user: Bytes::from_static(b"u") });
        roundtrip(Packet::NotifyLoginFail { message: Bytes::from_static(b"no") });
        roundtrip(Packet::NotifyClose { channel: 2 });
        roundtrip(Packet::RequestLeave);
        roundtrip(Packet::RouteControl { channel: 4, data: Bytes::from_static(b"c") });
        roundtrip(Packet::RequestSendControl { channel: 4, data: Bytes::from_static(b"c") });
        roundtrip(Packet::Response {
            command_id: 7,
            result: Frame::List(vec![Frame::Int(1)]),
        });
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let frame = Frame::List(vec![Frame::Int(999)]);
        let err = Packet::from_frame(&frame).unwrap_err();
        assert!(matches!(err, Error::UnknownTag(999)));
    }

    #[test]
    fn missing_field_is_an_error() {
        let frame = Frame::List(vec![Frame::Int(PacketType::RequestSend as i64), Frame::Int(3)]);
        let err = Packet::from_frame(&frame).unwrap_err();
        assert!(matches!(err, Error::MissingField("data")));
    }

    #[test]
    fn wrong_field_type_is_an_error() {
        let frame = Frame::List(vec![
            Frame::Int(PacketType::RequestSend as i64),
            Frame::bytes("not-a-channel"),
            Frame::bytes("data"),
        ]);
        let err = Packet::from_frame(&frame).unwrap_err();
        assert!(matches!(err, Error::WrongFieldType("channel")));
    }

    #[test]
    fn not_a_list_is_an_error() {
        let err = Packet::from_frame(&Frame::Int(5)).unwrap_err();
        assert!(matches!(err, Error::NotAList));
    }
}
