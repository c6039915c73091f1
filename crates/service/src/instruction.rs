use codec::Frame;

/// An application-level instruction routed to this agent out of band of
/// any channel (wire packet `instruction`, tag 16). `data` is an untyped
/// mapping keyed by `action`; this decodes it into the shape each action
/// needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Sync,
    OpenTerminal { name: String, channel: u32, size: Option<(u16, u16)> },
    OpenEcho { channel: u32 },
    OpenPortForward { service: String, channel: u32 },
    OpenPortRedirect { device_port: u16, channel: u32 },
    Reboot,
    ReadFile { channel: u32, path: String },
    RunCommand { channel: u32, command: String },
    ScanDirectory,
}

impl Instruction {
    /// Decode `data`, returning `None` (and logging) if the action is
    /// unrecognized or malformed rather than than failing the whole
    /// instruction packet.
    pub fn decode(data: &Frame) -> Option<Instruction> {
        let map = data.as_map()?;
        let action = str_field(map, "action")?;
        match action.as_str() {
            "sync" => Some(Instruction::Sync),
            "reboot-device" => Some(Instruction::Reboot),
            "scan-directory" => Some(Instruction::ScanDirectory),
            "open-terminal" => {
                let name = str_field(map, "name")?;
                let channel = u32_field(map, "port")?;
                let size = map
                    .get("size".as_bytes())
                    .and_then(Frame::as_list)
                    .and_then(|l| match l {
                        [cols, rows] => Some((cols.as_int()? as u16, rows.as_int()? as u16)),
                        _ => None,
                    });
                Some(Instruction::OpenTerminal { name, channel, size })
            }
            "open-echo" => Some(Instruction::OpenEcho { channel: u32_field(map, "port")? }),
            "open-portforward" => {
                let service = str_field(map, "service")?;
                let route = map.get("route".as_bytes())?.as_list()?;
                let channel = route.last()?.as_int()? as u32;
                Some(Instruction::OpenPortForward { service, channel })
            }
            "open-portredirect" => {
                let device_port = u32_field(map, "device_port")? as u16;
                let channel = u32_field(map, "m2m_port")?;
                Some(Instruction::OpenPortRedirect { device_port, channel })
            }
            "read-file" => {
                let channel = u32_field(map, "port")?;
                let path = str_field(map, "path")?;
                Some(Instruction::ReadFile { channel, path })
            }
            "run-command" => {
                let channel = u32_field(map, "port")?;
                let command = str_field(map, "command")?;
                Some(Instruction::RunCommand { channel, command })
            }
            other => {
                log::debug!("ignoring unrecognized instruction action '{}'", other);
                None
            }
        }
    }
}

fn str_field(map: &std::collections::BTreeMap<bytes::Bytes, Frame>, key: &str) -> Option<String> {
    map.get(key.as_bytes()).and_then(Frame::as_bytes).map(|b| String::from_utf8_lossy(b).into_owned())
}

fn u32_field(map: &std::collections::BTreeMap<bytes::Bytes, Frame>, key: &str) -> Option<u32> {
    map.get(key.as_bytes()).and_then(Frame::as_int).and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(pairs: Vec<(&str, Frame)>) -> Frame {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(bytes::Bytes::copy_from_slice(k.as_bytes()), v);
        }
        Frame::Map(m)
    }

    #[test]
    fn decodes_open_terminal_with_size() {
        let frame = map(vec![
            ("action", Frame::str("open-terminal")),
            ("name", Frame::str("shell")),
            ("port", Frame::Int(7)),
            ("size", Frame::List(vec![Frame::Int(100), Frame::Int(30)])),
        ]);
        let instr = Instruction::decode(&frame).unwrap();
        assert_eq!(
            instr,
            Instruction::OpenTerminal { name: "shell".into(), channel: 7, size: Some((100, 30)) }
        );
    }

    #[test]
    fn decodes_open_terminal_without_size() {
        let frame = map(vec![
            ("action", Frame::str("open-terminal")),
            ("name", Frame::str("shell")),
            ("port", Frame::Int(7)),
        ]);
        let instr = Instruction::decode(&frame).unwrap();
        assert_eq!(instr, Instruction::OpenTerminal { name: "shell".into(), channel: 7, size: None });
    }

    #[test]
    fn decodes_open_portforward_channel_from_last_route_element() {
        let frame = map(vec![
            ("action", Frame::str("open-portforward")),
            ("service", Frame::str("web")),
            (
                "route",
                Frame::List(vec![Frame::str("node1"), Frame::Int(1), Frame::str("node2"), Frame::Int(8)]),
            ),
        ]);
        let instr = Instruction::decode(&frame).unwrap();
        assert_eq!(instr, Instruction::OpenPortForward { service: "web".into(), channel: 8 });
    }

    #[test]
    fn decodes_open_portredirect() {
        let frame = map(vec![
            ("action", Frame::str("open-portredirect")),
            ("device_port", Frame::Int(22)),
            ("m2m_port", Frame::Int(9)),
        ]);
        let instr = Instruction::decode(&frame).unwrap();
        assert_eq!(instr, Instruction::OpenPortRedirect { device_port: 22, channel: 9 });
    }

    #[test]
    fn unrecognized_action_decodes_to_none() {
        let frame = map(vec![("action", Frame::str("do-a-backflip"))]);
        assert!(Instruction::decode(&frame).is_none());
    }

    #[test]
    fn missing_action_decodes_to_none() {
        let frame = map(vec![]);
        assert!(Instruction::decode(&frame).is_none());
    }

    #[test]
    fn sync_and_reboot_and_scan_need_no_fields() {
        assert_eq!(Instruction::decode(&map(vec![("action", Frame::str("sync"))])), Some(Instruction::Sync));
        assert_eq!(
            Instruction::decode(&map(vec![("action", Frame::str("reboot-device"))])),
            Some(Instruction::Reboot)
        );
        assert_eq!(
            Instruction::decode(&map(vec![("action", Frame::str("scan-directory"))])),
            Some(Instruction::ScanDirectory)
        );
    }
}
