//! Torrent file parser
//!
//! Decodes .torrent files into `TorrentInfo`. Only the info dictionary is
//! interpreted; tracker fields are ignored.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::torrent::info::{TorrentFile, TorrentInfo};

/// Deepest nesting of lists and dictionaries accepted in metainfo
const MAX_DEPTH: usize = 64;

/// Decoder of .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Decode metainfo from the bytes of a .torrent file
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        debug!("Decoding {} bytes of metainfo", data.len());

        let (root, info_span) = Self::parse_root(data)?;
        let info_span = info_span.ok_or_else(|| anyhow::anyhow!("Missing info dictionary"))?;
        let info_hash = TorrentInfo::generate_info_hash(&data[info_span.0..info_span.1]);

        let info_dict = root
            .get(b"info".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| anyhow::anyhow!("Info must be a dictionary"))?;

        let info = Self::convert_info_dict(info_dict, info_hash)?;
        info.validate().context("Inconsistent torrent metainfo")?;
        info!("Loaded torrent {} ({})", info.name, info.info_hash_hex());
        Ok(info)
    }

    /// Read and decode a .torrent file
    pub fn parse_file(path: &Path) -> Result<TorrentInfo> {
        info!("Loading metainfo from {}", path.display());
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read torrent file '{}'", path.display()))?;
        Self::parse_bytes(&data)
            .with_context(|| format!("Failed to parse torrent file '{}'", path.display()))
    }

    /// Decode the root dictionary, remembering where the info value lies
    fn parse_root(data: &[u8]) -> Result<(Dict, Option<(usize, usize)>)> {
        if data.first() != Some(&b'd') {
            return Err(anyhow::anyhow!("Root must be a dictionary"));
        }

        let mut idx = 1;
        let mut info_span = None;
        let dict = Self::parse_dict_body(data, &mut idx, 0, |key, start, end| {
            if key == b"info" {
                info_span = Some((start, end));
            }
        })?;

        if idx != data.len() {
            warn!("Ignoring {} trailing bytes after root dictionary", data.len() - idx);
        }
        Ok((dict, info_span))
    }

    /// Entries of a dictionary whose 'd' was consumed, through its closing
    /// 'e'. `on_entry` sees each key with the byte span of its value.
    fn parse_dict_body(
        data: &[u8],
        idx: &mut usize,
        depth: usize,
        mut on_entry: impl FnMut(&[u8], usize, usize),
    ) -> Result<Dict> {
        let mut dict = BTreeMap::new();
        while data.get(*idx).is_some_and(|&b| b != b'e') {
            let BencodeValue::Bytes(key) = Self::parse_value(data, idx, depth + 1)? else {
                return Err(anyhow::anyhow!("Non-string dictionary key at byte {}", *idx));
            };
            let start = *idx;
            let value = Self::parse_value(data, idx, depth + 1)?;
            on_entry(&key, start, *idx);
            dict.insert(key, value);
        }
        if *idx >= data.len() {
            return Err(anyhow::anyhow!("Unterminated dictionary"));
        }
        *idx += 1;
        Ok(dict)
    }

    fn parse_value(data: &[u8], idx: &mut usize, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(anyhow::anyhow!("bencode nested too deeply at byte {}", *idx));
        }
        let byte = *data
            .get(*idx)
            .ok_or_else(|| anyhow::anyhow!("Truncated bencode value at byte {}", *idx))?;

        match byte {
            b'i' => {
                *idx += 1;
                let end = data[*idx..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| anyhow::anyhow!("Unterminated integer"))?
                    + *idx;
                let value: i64 = std::str::from_utf8(&data[*idx..end])?
                    .parse()
                    .context("Invalid integer")?;
                *idx = end + 1;
                Ok(BencodeValue::Int(value))
            }
            b'l' => {
                *idx += 1;
                let mut list = Vec::new();
                while data.get(*idx).is_some_and(|&b| b != b'e') {
                    list.push(Self::parse_value(data, idx, depth + 1)?);
                }
                if *idx >= data.len() {
                    return Err(anyhow::anyhow!("Unterminated list"));
                }
                *idx += 1;
                Ok(BencodeValue::List(list))
            }
            b'd' => {
                *idx += 1;
                Ok(BencodeValue::Dict(Self::parse_dict_body(data, idx, depth, |_, _, _| {})?))
            }
            b'0'..=b'9' => {
                let colon = data[*idx..]
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or_else(|| anyhow::anyhow!("Unterminated string length"))?
                    + *idx;
                let length: usize = std::str::from_utf8(&data[*idx..colon])?
                    .parse()
                    .context("Invalid string length")?;
                let start = colon + 1;
                let end = start
                    .checked_add(length)
                    .filter(|&end| end <= data.len())
                    .ok_or_else(|| anyhow::anyhow!("String of {} bytes runs past end of data", length))?;
                *idx = end;
                Ok(BencodeValue::Bytes(data[start..end].to_vec()))
            }
            _ => Err(anyhow::anyhow!("Invalid bencode prefix {:?} at byte {}", byte as char, *idx)),
        }
    }

    fn convert_info_dict(info_dict: &Dict, info_hash: [u8; 20]) -> Result<TorrentInfo> {
        let get_int = |key: &[u8]| info_dict.get(key).and_then(|v| v.as_int());

        let name = info_dict
            .get(b"name".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| anyhow::anyhow!("Info dictionary has no name"))?;

        let piece_length = get_int(b"piece length")
            .filter(|&n| n > 0)
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid piece length"))? as u64;

        let pieces_bytes = info_dict
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| anyhow::anyhow!("Info dictionary has no pieces"))?;
        let pieces = TorrentInfo::parse_piece_hashes(pieces_bytes)?;

        let (length, files) = if let Some(len) = get_int(b"length") {
            if len < 0 {
                return Err(anyhow::anyhow!("Negative length field"));
            }
            (Some(len as u64), None)
        } else if let Some(file_list) = info_dict.get(b"files".as_slice()).and_then(|v| v.as_list()) {
            let mut torrent_files = Vec::with_capacity(file_list.len());
            for (i, entry) in file_list.iter().enumerate() {
                let file_dict = entry
                    .as_dict()
                    .ok_or_else(|| anyhow::anyhow!("File entry {} is not a dictionary", i))?;
                let length = file_dict
                    .get(b"length".as_slice())
                    .and_then(|v| v.as_int())
                    .filter(|&n| n >= 0)
                    .ok_or_else(|| anyhow::anyhow!("Missing file length in entry {}", i))? as u64;
                let path = file_dict
                    .get(b"path".as_slice())
                    .and_then(|v| v.as_list())
                    .ok_or_else(|| anyhow::anyhow!("Missing file path in entry {}", i))?
                    .iter()
                    .filter_map(|c| c.as_bytes())
                    .map(|c| String::from_utf8_lossy(c).to_string())
                    .collect();
                torrent_files.push(TorrentFile { path, length });
            }
            (None, Some(torrent_files))
        } else {
            return Err(anyhow::anyhow!("Info dictionary has neither length nor files"));
        };

        Ok(TorrentInfo {
            info_hash,
            piece_length,
            pieces,
            name,
            length,
            files,
        })
    }
}

type Dict = BTreeMap<Vec<u8>, BencodeValue>;

#[derive(Debug, Clone)]
enum BencodeValue {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<BencodeValue>),
    Dict(Dict),
}

impl BencodeValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            BencodeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    fn as_dict(&self) -> Option<&Dict> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_torrent() -> (Vec<u8>, Vec<u8>) {
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi6e4:name8:data.bin12:piece lengthi4e6:pieces40:");
        info.extend_from_slice(&[1u8; 40]);
        info.push(b'e');

        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce14:http://tracker4:info");
        data.extend_from_slice(&info);
        data.push(b'e');
        (data, info)
    }

    #[test]
    fn test_parse_bencode_int() {
        let data = b"i42e";
        let mut idx = 0;
        let value = TorrentParser::parse_value(data, &mut idx, 0).unwrap();
        assert_eq!(value.as_int(), Some(42));
    }

    #[test]
    fn test_parse_bencode_string() {
        let data = b"4:test";
        let mut idx = 0;
        let value = TorrentParser::parse_value(data, &mut idx, 0).unwrap();
        assert_eq!(value.as_bytes(), Some(b"test".as_ref()));
    }

    #[test]
    fn test_parse_bencode_string_past_end() {
        let mut idx = 0;
        assert!(TorrentParser::parse_value(b"10:short", &mut idx, 0).is_err());
    }

    #[test]
    fn test_parse_bencode_unterminated_list() {
        let mut idx = 0;
        assert!(TorrentParser::parse_value(b"li1ei2e", &mut idx, 0).is_err());
    }

    #[test]
    fn test_parse_bencode_nesting_limit() {
        let mut nested = vec![b'l'; 10];
        nested.extend_from_slice(b"i1e");
        nested.extend(vec![b'e'; 10]);
        let mut idx = 0;
        assert!(TorrentParser::parse_value(&nested, &mut idx, 0).is_ok());
        assert_eq!(idx, nested.len());

        let mut data = b"d4:info".to_vec();
        data.extend(vec![b'l'; 200_000]);
        let err = TorrentParser::parse_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
    }

    #[test]
    fn test_parse_single_file() {
        let (data, info_bytes) = single_file_torrent();
        let info = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(info.name, "data.bin");
        assert_eq!(info.piece_length, 4);
        assert_eq!(info.total_size(), 6);
        assert_eq!(info.piece_count(), 2);
        assert_eq!(info.info_hash, TorrentInfo::generate_info_hash(&info_bytes));
    }

    #[test]
    fn test_parse_multi_file() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d4:infod5:filesl");
        data.extend_from_slice(b"d6:lengthi3e4:pathl1:aee");
        data.extend_from_slice(b"d6:lengthi5e4:pathl3:sub1:bee");
        data.extend_from_slice(b"e4:name5:multi12:piece lengthi4e6:pieces40:");
        data.extend_from_slice(&[7u8; 40]);
        data.extend_from_slice(b"ee");

        let info = TorrentParser::parse_bytes(&data).unwrap();
        assert!(info.is_multi_file());
        assert_eq!(info.total_size(), 8);
        let layout = info.file_layout();
        assert_eq!(layout[1].display_path, "sub/b");
        assert_eq!(layout[1].offset, 3);
    }

    #[test]
    fn test_parse_missing_info() {
        assert!(TorrentParser::parse_bytes(b"d8:announce3:urle").is_err());
    }

    #[test]
    fn test_parse_piece_count_mismatch() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d4:infod6:lengthi100e4:name1:x12:piece lengthi4e6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"ee");
        assert!(TorrentParser::parse_bytes(&data).is_err());
    }
}
