// Copyright (c) 2024-2026 the unpickle developers.  Licensed under the
// Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according
// to those terms.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::{values_from_slice, DeOptions, Error, ErrorCode, Value};

mod arby;

fn decode(data: &[u8]) -> crate::Result<Vec<Value>> {
    values_from_slice(data, DeOptions::new())
}

fn decode_one(data: &[u8]) -> Value {
    let mut values = decode(data).unwrap();
    assert_eq!(values.len(), 1, "expected a single value: {:?}", values);
    values.pop().unwrap()
}

/// Decodes and returns the eval error code the stream fails with.
fn eval_code(data: &[u8]) -> ErrorCode {
    eval_code_with(data, DeOptions::new())
}

fn eval_code_with(data: &[u8], options: DeOptions) -> ErrorCode {
    match values_from_slice(data, options) {
        Err(Error::Eval(code, _)) => code,
        other => panic!("expected eval error, got {:?}", other),
    }
}

fn text(s: &str) -> Value {
    Value::String(s.into())
}

fn blob(b: &[u8]) -> Value {
    Value::Bytes(b.into())
}

fn tuple(items: Vec<Value>) -> Value {
    Value::Tuple(items.into())
}

fn list(items: Vec<Value>) -> Value {
    Value::List(Rc::new(RefCell::new(items)))
}

fn dict(entries: Vec<(Value, Value)>) -> Value {
    let map: BTreeMap<_, _> = entries
        .into_iter()
        .map(|(k, v)| (k.into_hashable().unwrap(), v))
        .collect();
    Value::Dict(Rc::new(RefCell::new(map)))
}

fn set(items: Vec<Value>) -> Value {
    let set: BTreeSet<_> = items.into_iter().map(|v| v.into_hashable().unwrap()).collect();
    Value::Set(Rc::new(RefCell::new(set)))
}

fn frozenset(items: Vec<Value>) -> Value {
    let set: BTreeSet<_> = items.into_iter().map(|v| v.into_hashable().unwrap()).collect();
    Value::FrozenSet(Rc::new(set))
}

mod number_tests {
    use super::*;

    #[test]
    fn single_int() {
        assert_eq!(decode(b"\x80\x02K\x2a.").unwrap(), vec![Value::I32(42)]);
    }

    #[test]
    fn int_line() {
        assert_eq!(decode_one(b"I-42\n."), Value::I32(-42));
    }

    #[test]
    fn int_line_booleans() {
        assert_eq!(decode_one(b"I00\n."), Value::Bool(false));
        assert_eq!(decode_one(b"I01\n."), Value::Bool(true));
    }

    #[test]
    fn int_line_overflow() {
        assert_eq!(eval_code(b"I3000000000\n."), ErrorCode::InvalidLiteral(b"3000000000".to_vec()));
    }

    #[test]
    fn newtrue_newfalse_none() {
        assert_eq!(
            decode(b"\x80\x02\x88\x89N.").unwrap(),
            vec![Value::Bool(true), Value::Bool(false), Value::None]
        );
    }

    #[test]
    fn binints() {
        assert_eq!(decode_one(b"\x80\x02J\xfe\xff\xff\xff."), Value::I32(-2));
        assert_eq!(decode_one(b"\x80\x02K\xff."), Value::I32(255));
        assert_eq!(decode_one(b"\x80\x02M\x39\x05."), Value::I32(1337));
    }

    #[test]
    fn long_line() {
        assert_eq!(decode_one(b"L123L\n."), Value::I64(123));
        assert_eq!(decode_one(b"L-5\n."), Value::I64(-5));
    }

    #[test]
    fn long1() {
        assert_eq!(decode_one(b"\x80\x02\x8a\x00."), Value::I64(0));
        assert_eq!(decode_one(b"\x80\x02\x8a\x01\x2a."), Value::I64(42));
        assert_eq!(decode_one(b"\x80\x02\x8a\x01\xff."), Value::I64(-1));
        assert_eq!(decode_one(b"\x80\x02\x8a\x01\x80."), Value::I64(-128));
        assert_eq!(decode_one(b"\x80\x02\x8a\x02\x00\x80."), Value::I64(-32768));
        let mut stream = b"\x80\x02\x8a\x08".to_vec();
        stream.extend_from_slice(&(-2i64).to_le_bytes());
        stream.push(b'.');
        assert_eq!(decode_one(&stream), Value::I64(-2));
    }

    #[test]
    fn long1_too_wide() {
        assert_eq!(
            eval_code(b"\x80\x02\x8a\x09\x00\x00\x00\x00\x00\x00\x00\x00\x00."),
            ErrorCode::LengthOverflow(9)
        );
    }

    #[test]
    fn long4() {
        assert_eq!(decode_one(b"\x80\x02\x8b\x04\x00\x00\x00-123."), Value::I64(-123));
    }

    #[test]
    fn long4_negative_length() {
        assert_eq!(eval_code(b"\x80\x02\x8b\xff\xff\xff\xff."), ErrorCode::NegativeLength);
    }

    #[test]
    fn float_line() {
        assert_eq!(decode_one(b"F2.5\n."), Value::F64(2.5));
    }

    #[test]
    fn binfloat() {
        let mut stream = b"\x80\x02G".to_vec();
        stream.extend_from_slice(&2.5f64.to_be_bytes());
        stream.push(b'.');
        assert_eq!(decode_one(&stream), Value::F64(2.5));
    }
}

mod string_tests {
    use super::*;
    use crate::StringEncoding;

    #[test]
    fn string_line_quoted() {
        assert_eq!(decode_one(b"S'abc'\n."), text("abc"));
    }

    #[test]
    fn string_line_latin1() {
        assert_eq!(decode_one(b"S'\xe9'\n."), text("\u{e9}"));
    }

    #[test]
    fn string_line_bad_quotes() {
        assert_eq!(eval_code(b"Sabc\n."), ErrorCode::InvalidLiteral(b"abc".to_vec()));
        assert_eq!(eval_code(b"S'abc\n."), ErrorCode::InvalidLiteral(b"'abc".to_vec()));
    }

    #[test]
    fn string_line_escapes_kept() {
        // Escape sequences in the body are not decoded.
        assert_eq!(decode_one(b"S'a\\n'\n."), text("a\\n"));
    }

    #[test]
    fn string_raw_mode() {
        let values = values_from_slice(b"S'abc'\n.", DeOptions::new().raw_strings()).unwrap();
        assert_eq!(values, vec![blob(b"abc")]);
    }

    #[test]
    fn string_utf8_mode() {
        let opts = DeOptions::new().string_encoding(StringEncoding::Utf8);
        let values = values_from_slice(b"U\x02\xc3\xa9.", opts.clone()).unwrap();
        assert_eq!(values, vec![text("\u{e9}")]);
        assert_eq!(eval_code_with(b"U\x01\xff.", opts), ErrorCode::StringNotUtf8);
    }

    #[test]
    fn short_binstring() {
        assert_eq!(decode_one(b"\x80\x02U\x05hello."), text("hello"));
    }

    #[test]
    fn binstring_negative_length() {
        assert_eq!(eval_code(b"\x80\x02T\xff\xff\xff\xff."), ErrorCode::NegativeLength);
    }

    #[test]
    fn unicode_line_reescapes_high_bytes() {
        assert_eq!(decode_one(b"Va\xe9\n."), text("a\\u00e9"));
    }

    #[test]
    fn binunicode() {
        assert_eq!(decode_one(b"X\x03\x00\x00\x00abc."), text("abc"));
        assert_eq!(decode_one(b"X\x00\x00\x00\x00."), text(""));
    }

    #[test]
    fn binunicode_invalid_utf8() {
        assert_eq!(eval_code(b"X\x01\x00\x00\x00\xff."), ErrorCode::StringNotUtf8);
    }

    #[test]
    fn short_binunicode() {
        assert_eq!(decode_one(b"\x80\x04\x8c\x03abc."), text("abc"));
    }

    #[test]
    fn binunicode8() {
        assert_eq!(decode_one(b"\x80\x04\x8d\x03\x00\x00\x00\x00\x00\x00\x00abc."), text("abc"));
    }

    #[test]
    fn binbytes() {
        assert_eq!(decode_one(b"\x80\x03B\x03\x00\x00\x00abc."), blob(b"abc"));
        assert_eq!(decode_one(b"\x80\x03C\x03abc."), blob(b"abc"));
        assert_eq!(decode_one(b"\x80\x04\x8e\x03\x00\x00\x00\x00\x00\x00\x00abc."), blob(b"abc"));
    }

    #[test]
    fn bytearray8() {
        let value = decode_one(b"\x80\x05\x96\x03\x00\x00\x00\x00\x00\x00\x00abc.");
        assert_eq!(value, Value::ByteArray(Rc::new(RefCell::new(b"abc".to_vec()))));
    }
}

mod container_tests {
    use super::*;

    #[test]
    fn tuple_of_three() {
        assert_eq!(
            decode(b"\x80\x02K\x01K\x02K\x03\x87.").unwrap(),
            vec![tuple(vec![Value::I32(1), Value::I32(2), Value::I32(3)])]
        );
    }

    #[test]
    fn small_tuples() {
        assert_eq!(decode_one(b"\x80\x02K\x01\x85."), tuple(vec![Value::I32(1)]));
        assert_eq!(
            decode_one(b"\x80\x02K\x01K\x02\x86."),
            tuple(vec![Value::I32(1), Value::I32(2)])
        );
    }

    #[test]
    fn marked_tuple_and_list() {
        assert_eq!(
            decode_one(b"(K\x01K\x02t."),
            tuple(vec![Value::I32(1), Value::I32(2)])
        );
        assert_eq!(
            decode_one(b"(K\x01K\x02l."),
            list(vec![Value::I32(1), Value::I32(2)])
        );
    }

    #[test]
    fn empties() {
        assert_eq!(
            decode(b"\x80\x04)]}\x8f.").unwrap(),
            vec![tuple(vec![]), list(vec![]), dict(vec![]), set(vec![])]
        );
    }

    #[test]
    fn mark_aggregate() {
        let values = decode(b"\x80\x02]q\x00(K\nK\x14e.").unwrap();
        assert_eq!(values, vec![list(vec![Value::I32(10), Value::I32(20)])]);
    }

    #[test]
    fn append() {
        assert_eq!(
            decode_one(b"]K\x01a."),
            list(vec![Value::I32(1)])
        );
    }

    #[test]
    fn append_to_non_list() {
        assert_eq!(
            eval_code(b"K\x01K\x02a."),
            ErrorCode::InvalidStackTop("list", "int")
        );
    }

    #[test]
    fn dict_from_mark() {
        assert_eq!(
            decode_one(b"(K\x01K\x02d."),
            dict(vec![(Value::I32(1), Value::I32(2))])
        );
    }

    #[test]
    fn setitem_and_setitems() {
        assert_eq!(
            decode_one(b"}K\x01K\x02s."),
            dict(vec![(Value::I32(1), Value::I32(2))])
        );
        assert_eq!(
            decode_one(b"\x80\x02}q\x00(K\x01U\x03oneu."),
            dict(vec![(Value::I32(1), text("one"))])
        );
    }

    #[test]
    fn duplicate_key_overwrites() {
        assert_eq!(
            decode_one(b"}K\x01K\x02sK\x01K\x03s."),
            dict(vec![(Value::I32(1), Value::I32(3))])
        );
    }

    #[test]
    fn none_dict_key_fails() {
        assert_eq!(eval_code(b"}NK\x02s."), ErrorCode::ValueNotHashable);
    }

    #[test]
    fn unhashable_dict_key_fails() {
        assert_eq!(eval_code(b"}]K\x02s."), ErrorCode::ValueNotHashable);
    }

    #[test]
    fn sets() {
        assert_eq!(
            decode_one(b"\x80\x04\x8f(K\x01K\x02\x90."),
            set(vec![Value::I32(1), Value::I32(2)])
        );
        assert_eq!(
            decode_one(b"\x80\x04(K\x01K\x02\x91."),
            frozenset(vec![Value::I32(1), Value::I32(2)])
        );
    }

    #[test]
    fn pop_and_dup() {
        assert_eq!(decode(b"K\x01K\x020.").unwrap(), vec![Value::I32(1)]);
        assert_eq!(decode(b"(K\x01K\x021.").unwrap(), vec![]);
        assert_eq!(decode(b"K\x012.").unwrap(), vec![Value::I32(1), Value::I32(1)]);
    }

    #[test]
    fn multiple_results() {
        assert_eq!(decode(b"K\x01K\x02.").unwrap(), vec![Value::I32(1), Value::I32(2)]);
    }
}

mod memo_tests {
    use super::*;

    #[test]
    fn memo_reuse() {
        let values = decode(b"\x80\x02U\x05helloq\x00h\x00\x86.").unwrap();
        assert_eq!(values, vec![tuple(vec![text("hello"), text("hello")])]);
        // Both slots are the same memoized string.
        match &values[0] {
            Value::Tuple(items) => match (&items[0], &items[1]) {
                (Value::String(a), Value::String(b)) => assert!(Rc::ptr_eq(a, b)),
                other => panic!("unexpected tuple contents: {:?}", other),
            },
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn memo_aliases_mutated_list() {
        // The list is memoized before APPENDS runs; the memoized entry
        // sees the mutation.
        let values = decode(b"\x80\x02]q\x00(K\nK\x14eh\x00\x86.").unwrap();
        match &values[0] {
            Value::Tuple(items) => match (&items[0], &items[1]) {
                (Value::List(a), Value::List(b)) => {
                    assert!(Rc::ptr_eq(a, b));
                    assert_eq!(*a.borrow(), vec![Value::I32(10), Value::I32(20)]);
                }
                other => panic!("unexpected tuple contents: {:?}", other),
            },
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn text_protocol_get_put() {
        let values = decode(b"]p0\n(K\x01eg0\n\x86.").unwrap();
        assert_eq!(
            values,
            vec![tuple(vec![list(vec![Value::I32(1)]), list(vec![Value::I32(1)])])]
        );
    }

    #[test]
    fn memoize_assigns_sequential_indices() {
        let values = decode(b"\x80\x04K\x01\x94K\x02\x94h\x00h\x01\x86.").unwrap();
        assert_eq!(
            values,
            vec![Value::I32(1), Value::I32(2), tuple(vec![Value::I32(1), Value::I32(2)])]
        );
    }

    #[test]
    fn missing_memo() {
        assert_eq!(eval_code(b"h\x05."), ErrorCode::MissingMemo(5));
    }

    #[test]
    fn negative_memo_index() {
        assert_eq!(eval_code(b"]p-1\n."), ErrorCode::InvalidMemoIndex(-1));
    }

    #[test]
    fn oversized_binary_memo_index() {
        assert_eq!(
            eval_code(b"j\xff\xff\xff\xff."),
            ErrorCode::InvalidMemoIndex(4294967295)
        );
    }

    #[test]
    fn mark_is_not_memoizable() {
        assert_eq!(eval_code(b"(p0\n."), ErrorCode::InvalidStackTop("value", "mark"));
    }
}

mod frame_tests {
    use super::*;
    use crate::read::FrameReader;
    use std::io::{Cursor, SeekFrom};

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&(body.len() as u64).to_le_bytes());
        stream.extend_from_slice(body);
        stream
    }

    #[test]
    fn framed_payload_equivalent() {
        let body = b"K\x2a.";
        assert_eq!(decode(&framed(body)).unwrap(), decode(b"\x80\x04K\x2a.").unwrap());
    }

    #[test]
    fn zero_length_frame() {
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&0u64.to_le_bytes());
        stream.extend_from_slice(b"K\x2a.");
        assert_eq!(decode(&stream).unwrap(), vec![Value::I32(42)]);
    }

    #[test]
    fn operand_crossing_frame_end() {
        // A two-byte frame holding BININT2 and only one of its operand
        // bytes; the other operand byte sits outside the frame.
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&2u64.to_le_bytes());
        stream.extend_from_slice(b"M\x01\x02.");
        assert_eq!(eval_code(&stream), ErrorCode::ReadBeyondFrame);
    }

    #[test]
    fn nested_frame() {
        // Outer frame of 10 bytes: an inner FRAME opcode plus one byte.
        let mut inner = vec![0x95];
        inner.extend_from_slice(&1u64.to_le_bytes());
        inner.push(b'K');
        assert_eq!(eval_code(&framed(&inner)), ErrorCode::NestedFrame);
    }

    #[test]
    fn frame_longer_than_input() {
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&255u64.to_le_bytes());
        stream.push(b'.');
        assert_eq!(eval_code(&stream), ErrorCode::Eof);
    }

    #[test]
    fn frame_too_large() {
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&(1u64 << 31).to_le_bytes());
        stream.push(b'.');
        assert_eq!(eval_code(&stream), ErrorCode::FrameTooLarge(1 << 31));
    }

    #[test]
    fn negative_frame_length() {
        let mut stream = b"\x80\x04\x95".to_vec();
        stream.extend_from_slice(&(-1i64).to_le_bytes());
        stream.push(b'.');
        assert_eq!(eval_code(&stream), ErrorCode::NegativeLength);
    }

    #[test]
    fn reader_bounds_position_within_frame() {
        let mut rdr = FrameReader::new(Cursor::new(b"abcdefgh".to_vec())).unwrap();
        assert_eq!(rdr.read_byte().unwrap(), b'a');
        rdr.enter_frame(3).unwrap();
        assert_eq!(rdr.position(), 1);
        assert_eq!(rdr.read_byte().unwrap(), b'b');
        assert_eq!(rdr.position(), 2);
        // Seeks may move anywhere within the frame, nowhere else.
        match rdr.seek(SeekFrom::Start(0)) {
            Err(Error::Eval(code, _)) => assert_eq!(code, ErrorCode::SeekOutsideFrame),
            other => panic!("expected seek error, got {:?}", other),
        }
        assert_eq!(rdr.seek(SeekFrom::Start(3)).unwrap(), 3);
        assert_eq!(rdr.read_byte().unwrap(), b'd');
        // The frame is exhausted; reads continue past it.
        assert_eq!(rdr.read_byte().unwrap(), b'e');
        assert_eq!(rdr.seek(SeekFrom::Start(0)).unwrap(), 0);
        assert_eq!(rdr.read_byte().unwrap(), b'a');
    }

    #[test]
    fn reader_line_at_eof() {
        let mut rdr = FrameReader::new(Cursor::new(b"ab".to_vec())).unwrap();
        assert_eq!(rdr.read_line().unwrap(), b"ab".to_vec());
    }
}

mod proxy_tests {
    use super::*;
    use crate::{ProxyObject, Unpickler};
    use std::any::Any;
    use std::io::Cursor;

    #[derive(Debug)]
    struct Blob {
        args: Vec<Value>,
        state: Option<Value>,
    }

    impl ProxyObject for Blob {
        fn set_state(&mut self, state: Value) -> Result<(), String> {
            self.state = Some(state);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Keeps the default `set_state`, which rejects any state.
    #[derive(Debug)]
    struct Rigid;

    impl ProxyObject for Rigid {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn blob_factory(args: Vec<Value>) -> Result<Box<dyn ProxyObject>, String> {
        Ok(Box::new(Blob { args, state: None }))
    }

    fn rigid_factory(_args: Vec<Value>) -> Result<Box<dyn ProxyObject>, String> {
        Ok(Box::new(Rigid))
    }

    fn unpickler(data: &[u8]) -> Unpickler<Cursor<Vec<u8>>> {
        let mut up = Unpickler::new(Cursor::new(data.to_vec()), DeOptions::new()).unwrap();
        up.register_proxy("geom", "Blob", blob_factory).unwrap();
        up.register_proxy("geom", "Rigid", rigid_factory).unwrap();
        up
    }

    fn blob_parts(value: &Value) -> (Vec<Value>, Option<Value>) {
        match value {
            Value::Object(obj) => {
                let guard = obj.borrow();
                let blob = guard.as_any().downcast_ref::<Blob>().expect("not a Blob");
                (blob.args.clone(), blob.state.clone())
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn newobj_zero_args_and_build() {
        let values = unpickler(b"\x80\x02cgeom\nBlob\n)\x81K\x07b.").deserialize().unwrap();
        let (args, state) = blob_parts(&values[0]);
        assert!(args.is_empty());
        assert_eq!(state, Some(Value::I32(7)));
    }

    #[test]
    fn newobj_with_args() {
        let values = unpickler(b"\x80\x02cgeom\nBlob\nK\x01K\x02\x86\x81.").deserialize().unwrap();
        let (args, state) = blob_parts(&values[0]);
        assert_eq!(args, vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(state, None);
    }

    #[test]
    fn newobj_single_non_tuple_arg() {
        let values = unpickler(b"\x80\x02cgeom\nBlob\nK\x05\x81.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert_eq!(args, vec![Value::I32(5)]);
    }

    #[test]
    fn inst_with_args() {
        let values = unpickler(b"\x80\x02(K\x01K\x02igeom\nBlob\n.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert_eq!(args, vec![Value::I32(1), Value::I32(2)]);
    }

    #[test]
    fn inst_zero_args() {
        let values = unpickler(b"\x80\x02(igeom\nBlob\n.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert!(args.is_empty());
    }

    #[test]
    fn obj_takes_class_from_below_the_mark() {
        let values = unpickler(b"\x80\x02(cgeom\nBlob\nK\x01o.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert_eq!(args, vec![Value::I32(1)]);
    }

    #[test]
    fn stack_global() {
        let values =
            unpickler(b"\x80\x04\x8c\x04geom\x8c\x04Blob\x93)\x81.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert!(args.is_empty());
    }

    #[test]
    fn stack_global_requires_strings() {
        let mut up = unpickler(b"\x80\x04K\x01K\x02\x93.");
        match up.deserialize() {
            Err(Error::Eval(code, _)) => {
                assert_eq!(code, ErrorCode::InvalidStackTop("str", "int"))
            }
            other => panic!("expected eval error, got {:?}", other),
        }
    }

    #[test]
    fn newobj_ex_discards_kwargs() {
        let values = unpickler(b"\x80\x04cgeom\nBlob\n)}\x92.").deserialize().unwrap();
        let (args, _) = blob_parts(&values[0]);
        assert!(args.is_empty());
    }

    #[test]
    fn build_rejected_by_object() {
        let mut up = unpickler(b"\x80\x02cgeom\nRigid\n)\x81Nb.");
        match up.deserialize() {
            Err(Error::Eval(ErrorCode::Proxy(msg), _)) => {
                assert_eq!(msg, "object does not accept state")
            }
            other => panic!("expected proxy error, got {:?}", other),
        }
    }

    #[test]
    fn unregistered_global() {
        assert_eq!(
            eval_code(b"\x80\x02cfoo\nBar\n."),
            ErrorCode::UnregisteredProxy("foo".into(), "Bar".into())
        );
    }

    #[test]
    fn duplicate_registration() {
        let mut up = unpickler(b".");
        match up.register_proxy("geom", "Blob", |_| Err("unused".into())) {
            Err(Error::Syntax(code)) => {
                assert_eq!(code, ErrorCode::DuplicateProxy("geom".into(), "Blob".into()))
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn factory_failure_surfaces() {
        let mut up = Unpickler::new(Cursor::new(b"\x80\x02cx\ny\n)\x81.".to_vec()), DeOptions::new())
            .unwrap();
        up.register_proxy("x", "y", |_| Err("boom".into())).unwrap();
        match up.deserialize() {
            Err(Error::Eval(ErrorCode::Proxy(msg), _)) => assert_eq!(msg, "boom"),
            other => panic!("expected proxy error, got {:?}", other),
        }
    }
}

mod buffer_tests {
    use super::*;

    #[test]
    fn next_buffer() {
        let opts = DeOptions::new().out_of_band(vec![b"abc".to_vec()]);
        let values = values_from_slice(b"\x80\x05\x97.", opts).unwrap();
        assert_eq!(values, vec![Value::ByteArray(Rc::new(RefCell::new(b"abc".to_vec())))]);
    }

    #[test]
    fn next_buffer_made_readonly() {
        let opts = DeOptions::new().out_of_band(vec![b"abc".to_vec()]);
        let values = values_from_slice(b"\x80\x05\x97\x98.", opts).unwrap();
        assert_eq!(values, vec![blob(b"abc")]);
    }

    #[test]
    fn buffers_exhausted() {
        let opts = DeOptions::new().out_of_band(vec![b"abc".to_vec()]);
        assert_eq!(eval_code_with(b"\x80\x05\x97\x97.", opts), ErrorCode::BufferExhausted);
        assert_eq!(eval_code(b"\x80\x05\x97."), ErrorCode::BufferExhausted);
    }

    #[test]
    fn readonly_buffer_is_idempotent_on_bytes() {
        assert_eq!(decode_one(b"\x80\x05C\x03abc\x98."), blob(b"abc"));
    }

    #[test]
    fn readonly_buffer_freezes_bytearray() {
        assert_eq!(
            decode_one(b"\x80\x05\x96\x03\x00\x00\x00\x00\x00\x00\x00abc\x98."),
            blob(b"abc")
        );
    }

    #[test]
    fn readonly_buffer_rejects_other_values() {
        assert_eq!(
            eval_code(b"\x80\x05K\x01\x98."),
            ErrorCode::InvalidStackTop("buffer", "int")
        );
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn empty_input() {
        match decode(b"") {
            Err(Error::Eval(code, pos)) => {
                assert_eq!(code, ErrorCode::Eof);
                assert_eq!(pos, 0);
            }
            other => panic!("expected eval error, got {:?}", other),
        }
    }

    #[test]
    fn proto_and_stop_only() {
        assert_eq!(decode(b"\x80\x02.").unwrap(), vec![]);
    }

    #[test]
    fn eof_before_stop() {
        assert_eq!(eval_code(b"\x80\x02K\x01"), ErrorCode::Eof);
        assert_eq!(eval_code(b"\x80\x02K"), ErrorCode::Eof);
        assert_eq!(eval_code(b"X\x04\x00\x00\x00ab"), ErrorCode::Eof);
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(eval_code(b"\x7f."), ErrorCode::UnknownOpcode(0x7f));
    }

    #[test]
    fn unsupported_opcodes() {
        assert_eq!(eval_code(b"\x80\x02R."), ErrorCode::Unsupported("REDUCE"));
        assert_eq!(eval_code(b"P1\n."), ErrorCode::Unsupported("PERSID"));
        assert_eq!(eval_code(b"Q."), ErrorCode::Unsupported("BINPERSID"));
        assert_eq!(eval_code(b"\x80\x02\x82\x01."), ErrorCode::Unsupported("EXT1"));
        assert_eq!(eval_code(b"\x80\x02\x83\x01\x00."), ErrorCode::Unsupported("EXT2"));
        assert_eq!(eval_code(b"\x80\x02\x84\x01\x00\x00\x00."), ErrorCode::Unsupported("EXT4"));
    }

    #[test]
    fn protocol_too_new() {
        assert_eq!(eval_code(b"\x80\x06."), ErrorCode::ProtocolUnsupported(6));
    }

    #[test]
    fn stray_proto() {
        assert_eq!(eval_code(b"K\x01\x80\x02."), ErrorCode::StrayProto);
    }

    #[test]
    fn stack_underflow() {
        assert_eq!(eval_code(b"0."), ErrorCode::StackUnderflow);
        assert_eq!(eval_code(b"K\x01\x87."), ErrorCode::StackUnderflow);
        assert_eq!(eval_code(b"t."), ErrorCode::StackUnderflow);
    }

    #[test]
    fn mark_left_on_stack() {
        assert_eq!(eval_code(b"(."), ErrorCode::InvalidStackTop("value", "mark"));
    }

    #[test]
    fn mark_popped_as_value() {
        assert_eq!(eval_code(b"(\x85."), ErrorCode::InvalidStackTop("value", "mark"));
    }

    #[test]
    fn fuzzing() {
        // Tries to ensure that we don't panic when encountering strange
        // streams.
        use rand::{thread_rng, Rng};
        for _ in 0..1000 {
            let mut stream = [0u8; 1000];
            thread_rng().fill(&mut stream[..]);
            let _ = decode(&stream);
        }
    }
}

mod api_tests {
    use super::*;
    use crate::Unpickler;
    use std::io::Cursor;

    #[test]
    fn protocol_is_recorded() {
        let mut up = Unpickler::new(Cursor::new(b"\x80\x04.".to_vec()), DeOptions::new()).unwrap();
        assert_eq!(up.protocol(), 0);
        up.deserialize().unwrap();
        assert_eq!(up.protocol(), 4);
    }

    #[test]
    fn consecutive_pickles_from_one_stream() {
        let mut up =
            Unpickler::new(Cursor::new(b"K\x01.K\x02.".to_vec()), DeOptions::new()).unwrap();
        assert_eq!(up.deserialize().unwrap(), vec![Value::I32(1)]);
        assert_eq!(up.deserialize().unwrap(), vec![Value::I32(2)]);
    }

    #[test]
    fn into_inner_returns_the_source() {
        let up = Unpickler::new(Cursor::new(b".".to_vec()), DeOptions::new()).unwrap();
        let cursor = up.into_inner();
        assert_eq!(cursor.into_inner(), b".".to_vec());
    }

    #[test]
    fn values_from_file() {
        let path = std::env::temp_dir().join(format!("unpickle-test-{}", std::process::id()));
        std::fs::write(&path, b"\x80\x02K\x2a.").unwrap();
        let values = crate::values_from_file(&path, DeOptions::new()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(values, vec![Value::I32(42)]);
    }
}

mod serde_tests {
    use super::*;
    use crate::from_value;

    #[test]
    fn to_json() {
        let value = decode_one(b"\x80\x02}q\x00(U\x03oneK\x01u.");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"one": 1}));
    }

    #[test]
    fn nested_to_json() {
        let value = decode_one(b"\x80\x02]q\x00(K\x01G?\xf8\x00\x00\x00\x00\x00\x00Ne.");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!([1, 1.5, null]));
    }

    #[test]
    fn object_values_do_not_serialize() {
        let value = Value::Mark;
        assert!(serde_json::to_value(&value).is_err());
    }

    #[test]
    fn from_value_struct() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Point {
            x: i64,
            y: i64,
        }
        let value = dict(vec![(text("x"), Value::I32(1)), (text("y"), Value::I64(2))]);
        let point: Point = from_value(value).unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
    }

    #[test]
    fn from_value_sequences_and_options() {
        let value = list(vec![Value::I32(1), Value::I32(2)]);
        let ints: Vec<i64> = from_value(value).unwrap();
        assert_eq!(ints, vec![1, 2]);

        let none: Option<i64> = from_value(Value::None).unwrap();
        assert_eq!(none, None);
        let some: Option<i64> = from_value(Value::I32(3)).unwrap();
        assert_eq!(some, Some(3));
    }
}

mod prop_tests {
    use super::arby::Prim;
    use super::*;

    #[test]
    fn primitive_roundtrip() {
        fn prop(prims: Vec<Prim>) -> bool {
            for proto in [2u8, 3, 4, 5] {
                let mut stream = vec![0x80, proto];
                let mut expected = Vec::new();
                for prim in &prims {
                    if !prim.in_protocol(proto) {
                        continue;
                    }
                    prim.emit(&mut stream);
                    expected.push(prim.expected());
                }
                stream.push(b'.');
                match decode(&stream) {
                    Ok(values) => {
                        if values != expected {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
            true
        }
        quickcheck::quickcheck(prop as fn(Vec<Prim>) -> bool);
    }
}
