// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the value codecs.

use std::collections::BTreeMap;

use cairn_store::{BincodeCodec, Codec, Compressed, JsonCodec, RawCodec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Address {
    street: String,
    number: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
    score: f64,
    tags: Vec<String>,
    address: Option<Address>,
    attributes: BTreeMap<String, i32>,
}

fn customer() -> Customer {
    Customer {
        id: 17,
        name: "Ada".to_owned(),
        score: 98.5,
        tags: vec!["gold".to_owned(), "early".to_owned()],
        address: Some(Address {
            street: "Main".to_owned(),
            number: 12,
        }),
        attributes: BTreeMap::from([("visits".to_owned(), 3), ("orders".to_owned(), -1)]),
    }
}

fn round_trip<T, C>(codec: &C, value: &T) -> T
where
    C: Codec<T>,
{
    let bytes = codec.encode(value).expect("encode failed");
    codec.decode(&bytes).expect("decode failed")
}

#[test]
fn nested_record_survives_every_structured_codec() {
    let value = customer();
    assert_eq!(round_trip(&JsonCodec, &value), value);
    assert_eq!(round_trip(&BincodeCodec, &value), value);
    assert_eq!(round_trip(&Compressed::new(JsonCodec), &value), value);
    assert_eq!(round_trip(&Compressed::with_level(BincodeCodec, 9), &value), value);
}

#[test]
fn primitives_survive_json() {
    assert_eq!(round_trip(&JsonCodec, &42_i64), 42);
    assert!(round_trip(&JsonCodec, &true));
    assert_eq!(round_trip(&JsonCodec, &"text".to_owned()), "text");
    assert_eq!(round_trip(&JsonCodec, &Option::<u8>::None), None);
}

#[test]
fn raw_codec_passes_bytes_through() {
    let bytes = vec![0_u8, 255, 7];
    assert_eq!(round_trip(&RawCodec, &bytes), bytes);
    assert_eq!(Codec::<Vec<u8>>::encode(&RawCodec, &bytes).expect("encode"), bytes);
}

#[test]
fn bincode_is_more_compact_than_json() {
    let value = customer();
    let json = JsonCodec.encode(&value).expect("json");
    let binary = BincodeCodec.encode(&value).expect("bincode");
    assert!(binary.len() < json.len(), "bincode {} vs json {}", binary.len(), json.len());
}

#[test]
fn decoding_with_wrong_codec_fails() {
    let bytes = BincodeCodec.encode(&customer()).expect("encode");
    let result: cairn_store::Result<Customer> = JsonCodec.decode(&bytes);
    assert!(result.is_err());
}
