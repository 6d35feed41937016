// Wire messages for the peer sync protocol

use std::io::{Cursor, Read};

use crate::core::serialize::{
    read_var_string, read_varint, write_var_bytes, write_var_string, write_varint, DecodeError,
};
use crate::core::{serialize::read_var_bytes, Hash256};

/// Every message starts with a fixed-width ASCII command tag, zero-padded
pub const COMMAND_WIDTH: usize = 20;

/// Version of the sync protocol itself
pub const PROTOCOL_VERSION: u32 = 1;

/// What an inventory (or block request) announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
}

impl InvKind {
    fn to_byte(self) -> u8 {
        match self {
            InvKind::Block => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            1 => Ok(InvKind::Block),
            other => Err(DecodeError::UnknownInventoryKind(other)),
        }
    }
}

/// One peer message: a command tag plus its payload. Sent one per
/// connection; replies arrive as fresh connections to the sender's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Height announcement; opens every exchange
    Version {
        version: u32,
        best_height: u32,
        addr_from: String,
    },
    /// Ask a peer for its full hash inventory
    GetChain { addr_from: String },
    /// All block hashes a peer holds, ordered tip to genesis
    Inventory {
        addr_from: String,
        kind: InvKind,
        hashes: Vec<Hash256>,
    },
    /// Ask for one block by hash
    GetBlock {
        addr_from: String,
        kind: InvKind,
        hash: Hash256,
    },
    /// A serialized block
    SendBlock {
        addr_from: String,
        block: Vec<u8>,
    },
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version { .. } => "version",
            Message::GetChain { .. } => "getblockchain",
            Message::Inventory { .. } => "inventory",
            Message::GetBlock { .. } => "getblock",
            Message::SendBlock { .. } => "sendblock",
        }
    }

    /// Zero-padded command tag followed by the payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COMMAND_WIDTH];
        let command = self.command().as_bytes();
        buf[..command.len()].copy_from_slice(command);

        match self {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => {
                buf.extend_from_slice(&version.to_le_bytes());
                buf.extend_from_slice(&best_height.to_le_bytes());
                write_var_string(&mut buf, addr_from).expect("write to Vec cannot fail");
            }
            Message::GetChain { addr_from } => {
                write_var_string(&mut buf, addr_from).expect("write to Vec cannot fail");
            }
            Message::Inventory {
                addr_from,
                kind,
                hashes,
            } => {
                write_var_string(&mut buf, addr_from).expect("write to Vec cannot fail");
                buf.push(kind.to_byte());
                write_varint(&mut buf, hashes.len() as u64).expect("write to Vec cannot fail");
                for hash in hashes {
                    buf.extend_from_slice(hash.as_bytes());
                }
            }
            Message::GetBlock {
                addr_from,
                kind,
                hash,
            } => {
                write_var_string(&mut buf, addr_from).expect("write to Vec cannot fail");
                buf.push(kind.to_byte());
                buf.extend_from_slice(hash.as_bytes());
            }
            Message::SendBlock { addr_from, block } => {
                write_var_string(&mut buf, addr_from).expect("write to Vec cannot fail");
                write_var_bytes(&mut buf, block).expect("write to Vec cannot fail");
            }
        }

        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < COMMAND_WIDTH {
            return Err(DecodeError::InvalidLength {
                what: "message",
                expected: COMMAND_WIDTH,
                got: data.len(),
            });
        }

        let tag: Vec<u8> = data[..COMMAND_WIDTH]
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .collect();
        let command =
            String::from_utf8(tag).map_err(|_| DecodeError::InvalidUtf8)?;

        let mut cursor = Cursor::new(&data[COMMAND_WIDTH..]);
        match command.as_str() {
            "version" => {
                let mut version_bytes = [0u8; 4];
                cursor.read_exact(&mut version_bytes)?;
                let mut height_bytes = [0u8; 4];
                cursor.read_exact(&mut height_bytes)?;
                let addr_from = read_var_string(&mut cursor)?;
                Ok(Message::Version {
                    version: u32::from_le_bytes(version_bytes),
                    best_height: u32::from_le_bytes(height_bytes),
                    addr_from,
                })
            }
            "getblockchain" => Ok(Message::GetChain {
                addr_from: read_var_string(&mut cursor)?,
            }),
            "inventory" => {
                let addr_from = read_var_string(&mut cursor)?;
                let mut kind_byte = [0u8; 1];
                cursor.read_exact(&mut kind_byte)?;
                let kind = InvKind::from_byte(kind_byte[0])?;

                let count = read_varint(&mut cursor)? as usize;
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    let mut hash_bytes = [0u8; 32];
                    cursor.read_exact(&mut hash_bytes)?;
                    hashes.push(Hash256::new(hash_bytes));
                }
                Ok(Message::Inventory {
                    addr_from,
                    kind,
                    hashes,
                })
            }
            "getblock" => {
                let addr_from = read_var_string(&mut cursor)?;
                let mut kind_byte = [0u8; 1];
                cursor.read_exact(&mut kind_byte)?;
                let kind = InvKind::from_byte(kind_byte[0])?;

                let mut hash_bytes = [0u8; 32];
                cursor.read_exact(&mut hash_bytes)?;
                Ok(Message::GetBlock {
                    addr_from,
                    kind,
                    hash: Hash256::new(hash_bytes),
                })
            }
            "sendblock" => {
                let addr_from = read_var_string(&mut cursor)?;
                let block = read_var_bytes(&mut cursor)?;
                Ok(Message::SendBlock { addr_from, block })
            }
            _ => Err(DecodeError::UnknownCommand(command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash256;

    fn roundtrip(message: Message) {
        let encoded = message.encode();
        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_version_roundtrip() {
        roundtrip(Message::Version {
            version: PROTOCOL_VERSION,
            best_height: 42,
            addr_from: "127.0.0.1:3000".into(),
        });
    }

    #[test]
    fn test_get_chain_roundtrip() {
        roundtrip(Message::GetChain {
            addr_from: "127.0.0.1:3001".into(),
        });
    }

    #[test]
    fn test_inventory_roundtrip() {
        roundtrip(Message::Inventory {
            addr_from: "127.0.0.1:3000".into(),
            kind: InvKind::Block,
            hashes: vec![hash256(b"a"), hash256(b"b"), hash256(b"c")],
        });
    }

    #[test]
    fn test_get_block_roundtrip() {
        roundtrip(Message::GetBlock {
            addr_from: "127.0.0.1:3000".into(),
            kind: InvKind::Block,
            hash: hash256(b"wanted"),
        });
    }

    #[test]
    fn test_send_block_roundtrip() {
        roundtrip(Message::SendBlock {
            addr_from: "127.0.0.1:3000".into(),
            block: vec![1, 2, 3, 4, 5],
        });
    }

    #[test]
    fn test_command_tag_is_zero_padded() {
        let encoded = Message::GetChain {
            addr_from: "x".into(),
        }
        .encode();
        assert_eq!(&encoded[..13], b"getblockchain");
        assert!(encoded[13..COMMAND_WIDTH].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut data = vec![0u8; COMMAND_WIDTH];
        data[..7].copy_from_slice(b"badcmd!");
        assert!(matches!(
            Message::decode(&data),
            Err(DecodeError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_short_message_rejected() {
        assert!(Message::decode(b"ver").is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let encoded = Message::Version {
            version: 1,
            best_height: 3,
            addr_from: "127.0.0.1:3000".into(),
        }
        .encode();
        assert!(Message::decode(&encoded[..COMMAND_WIDTH + 2]).is_err());
    }
}
