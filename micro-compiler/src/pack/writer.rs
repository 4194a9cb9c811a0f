use super::*;

/// Serialize `record`. Pure: identical inputs give identical bytes.
pub fn pack(record: &Record, policy: &ExcludePolicy, options: PackOptions) -> Result<Vec<u8>> {
    let packer = Packer {
        policy,
        width: options.offset_width,
    };
    let body = packer.record(record, record.schema().name)?;

    let mut out = Vec::with_capacity(MAGIC_LEN + body.len());
    if options.write_magic {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.push(options.offset_width.bytes() as u8);
        out.push(0);
    }
    out.extend_from_slice(&body);
    Ok(out)
}

struct Packer<'a> {
    policy: &'a ExcludePolicy,
    width: OffsetWidth,
}

/// An encoded variable-length value and the `len` its slot records.
struct Payload {
    bytes: Vec<u8>,
    len: usize,
}

impl Payload {
    fn is_empty(&self) -> bool {
        self.len == 0 && self.bytes.is_empty()
    }
}

impl Packer<'_> {
    fn slot_size(&self, kind: &FieldKind) -> usize {
        match kind {
            FieldKind::Scalar(k) => k.slot_size(),
            _ => 2 * self.width.bytes(),
        }
    }

    fn record(&self, record: &Record, path: &str) -> Result<Vec<u8>> {
        let schema = record.schema();
        let fields: Vec<_> = record
            .fields()
            .filter(|(field, _)| !self.policy.excludes(schema.name, field.name))
            .collect();

        let fixed_len: usize = fields.iter().map(|(f, _)| self.slot_size(&f.kind)).sum();
        let heap_start = align_up(fixed_len, PAYLOAD_ALIGN);

        let mut fixed = Vec::with_capacity(heap_start);
        let mut heap = Vec::new();

        for (field, value) in fields {
            let field_path = format!("{path}.{}", field.name);
            if let FieldKind::Scalar(kind) = field.kind {
                write_scalar(&mut fixed, kind, value, &field_path)?;
                continue;
            }
            let payload = self.payload(&field.kind, value, &field_path)?;
            let offset = place(&mut heap, heap_start, &payload);
            self.write_offset(&mut fixed, offset, &field_path)?;
            self.write_offset(&mut fixed, payload.len, &field_path)?;
        }

        fixed.resize(heap_start, 0);
        fixed.extend_from_slice(&heap);
        Ok(fixed)
    }

    fn payload(&self, kind: &FieldKind, value: &Value, path: &str) -> Result<Payload> {
        let payload = match (kind, value) {
            (FieldKind::Str, Value::Str(s)) => Payload {
                bytes: s.as_bytes().to_vec(),
                len: s.len(),
            },
            (FieldKind::Bytes, Value::Bytes(b)) => Payload {
                bytes: b.clone(),
                len: b.len(),
            },
            (FieldKind::Record(_), Value::Record(r)) => {
                let bytes = self.record(r, path)?;
                Payload {
                    len: bytes.len(),
                    bytes,
                }
            }
            (FieldKind::ScalarList(kind), Value::List(items)) => {
                let mut bytes = Vec::with_capacity(items.len() * kind.slot_size());
                for item in items {
                    write_scalar(&mut bytes, *kind, item, path)?;
                }
                Payload {
                    bytes,
                    len: items.len(),
                }
            }
            (FieldKind::StrList, Value::List(items)) | (FieldKind::RecordList(_), Value::List(items)) => {
                let elements = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let elem_path = format!("{path}[{i}]");
                        match item {
                            Value::Str(s) => Ok(Payload {
                                bytes: s.as_bytes().to_vec(),
                                len: s.len(),
                            }),
                            Value::Record(r) => {
                                let bytes = self.record(r, &elem_path)?;
                                Ok(Payload {
                                    len: bytes.len(),
                                    bytes,
                                })
                            }
                            _ => Err(mismatch(&elem_path, kind)),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Payload {
                    bytes: self.table(&elements, path)?,
                    len: items.len(),
                }
            }
            _ => return Err(mismatch(path, kind)),
        };
        Ok(payload)
    }

    /// Element table of `(offset, len)` pairs followed by the element payloads.
    fn table(&self, elements: &[Payload], path: &str) -> Result<Vec<u8>> {
        let table_len = elements.len() * 2 * self.width.bytes();
        let body_start = align_up(table_len, PAYLOAD_ALIGN);

        let mut table = Vec::with_capacity(body_start);
        let mut body = Vec::new();
        for (i, element) in elements.iter().enumerate() {
            let elem_path = format!("{path}[{i}]");
            let offset = place(&mut body, body_start, element);
            self.write_offset(&mut table, offset, &elem_path)?;
            self.write_offset(&mut table, element.len, &elem_path)?;
        }

        table.resize(body_start, 0);
        table.extend_from_slice(&body);
        Ok(table)
    }

    fn write_offset(&self, buf: &mut Vec<u8>, value: usize, path: &str) -> Result<()> {
        let value = value as u64;
        if value > self.width.max_value() {
            return Err(Error::PackingOverflow {
                field: path.to_string(),
                value,
                width: self.width,
            });
        }
        match self.width {
            OffsetWidth::U16 => buf.extend_from_slice(&(value as u16).to_le_bytes()),
            OffsetWidth::U32 => buf.extend_from_slice(&(value as u32).to_le_bytes()),
        }
        Ok(())
    }
}

/// Append `payload` to `heap` on an aligned boundary; returns its offset
/// relative to the container (whose heap begins at `heap_start`).
fn place(heap: &mut Vec<u8>, heap_start: usize, payload: &Payload) -> usize {
    if payload.is_empty() {
        return 0;
    }
    let aligned = align_up(heap.len(), PAYLOAD_ALIGN);
    heap.resize(aligned, 0);
    heap.extend_from_slice(&payload.bytes);
    heap_start + aligned
}

fn write_scalar(buf: &mut Vec<u8>, kind: ScalarKind, value: &Value, path: &str) -> Result<()> {
    match (kind, value) {
        (ScalarKind::Bool, Value::Bool(b)) => buf.extend_from_slice(&u32::from(*b).to_le_bytes()),
        (ScalarKind::I32, Value::I32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (ScalarKind::U32, Value::U32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (ScalarKind::I64, Value::I64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (ScalarKind::F32, Value::F32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        _ => return Err(mismatch(path, &FieldKind::Scalar(kind))),
    }
    Ok(())
}

fn mismatch(path: &str, kind: &FieldKind) -> Error {
    Error::RecordMismatch {
        field: path.to_string(),
        expected: kind.describe(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::tests::{point, sample_shape, POINT, SHAPE};

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    #[test]
    fn point_layout_is_exact() {
        let bytes = pack(&point(5, "ab"), &ExcludePolicy::none(), PackOptions::default()).unwrap();
        // x: i32, label: (offset u32, len u32), then "ab" padded to 4.
        assert_eq!(
            bytes,
            vec![5, 0, 0, 0, 12, 0, 0, 0, 2, 0, 0, 0, b'a', b'b']
        );
    }

    #[test]
    fn scalar_slots_reject_values_of_another_kind() {
        let mut record = point(5, "ab");
        record.values[0] = Value::U32(5);
        match pack(&record, &ExcludePolicy::none(), PackOptions::default()) {
            Err(Error::RecordMismatch { field, .. }) => assert_eq!(field, "Point.x"),
            other => panic!("expected RecordMismatch, got {other:?}"),
        }

        let mut shape = sample_shape();
        let dims = SHAPE.index_of("dims").unwrap();
        shape.values[dims] = Value::List(vec![Value::I64(1), Value::I32(28)]);
        match pack(&shape, &ExcludePolicy::none(), PackOptions::default()) {
            Err(Error::RecordMismatch { field, .. }) => assert_eq!(field, "Shape.dims"),
            other => panic!("expected RecordMismatch, got {other:?}"),
        }
    }

    #[test]
    fn sixteen_bit_offsets_shrink_slots() {
        let options = PackOptions {
            offset_width: OffsetWidth::U16,
            write_magic: false,
        };
        let bytes = pack(&point(5, "ab"), &ExcludePolicy::none(), options).unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 2);
        assert_eq!(u16_at(&bytes, 4), 8);
        assert_eq!(u16_at(&bytes, 6), 2);
        assert_eq!(&bytes[8..], b"ab");
    }

    #[test]
    fn magic_prefix() {
        let options = PackOptions {
            offset_width: OffsetWidth::U16,
            write_magic: true,
        };
        let bytes = pack(&Record::new(&POINT), &ExcludePolicy::none(), options).unwrap();
        assert_eq!(&bytes[..4], b"MCNN");
        assert_eq!(&bytes[4..8], &[1, 0, 2, 0]);
        // x = 0, label empty (0, 0)
        assert_eq!(&bytes[8..], &[0u8; 8]);
    }

    #[test]
    fn excluded_fields_do_not_affect_output() {
        let policy = ExcludePolicy::none().exclude("Shape", &["secret", "tags"]);
        let a = sample_shape();
        let b = a
            .clone()
            .with("secret", -1i64)
            .unwrap()
            .with("tags", Value::list(["other"]))
            .unwrap();
        let packed_a = pack(&a, &policy, PackOptions::default()).unwrap();
        let packed_b = pack(&b, &policy, PackOptions::default()).unwrap();
        assert_eq!(packed_a, packed_b);

        let full = pack(&a, &ExcludePolicy::none(), PackOptions::default()).unwrap();
        assert!(full.len() > packed_a.len());
    }

    #[test]
    fn packing_is_deterministic() {
        let rec = sample_shape();
        let first = pack(&rec, &ExcludePolicy::none(), PackOptions::default()).unwrap();
        let second = pack(&rec.clone(), &ExcludePolicy::none(), PackOptions::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn overflow_names_the_field() {
        let big = Record::new(&SHAPE)
            .with("payload", vec![0u8; 70_000])
            .unwrap();
        let options = PackOptions {
            offset_width: OffsetWidth::U16,
            write_magic: false,
        };
        match pack(&big, &ExcludePolicy::none(), options) {
            Err(Error::PackingOverflow { field, value, width }) => {
                assert_eq!(field, "Shape.payload");
                assert_eq!(value, 70_000);
                assert_eq!(width, OffsetWidth::U16);
            }
            other => panic!("expected PackingOverflow, got {other:?}"),
        }
        assert!(pack(&big, &ExcludePolicy::none(), PackOptions::default()).is_ok());
    }

    #[test]
    fn overflow_inside_lists_reports_element_path() {
        let long = "x".repeat(70_000);
        let rec = Record::new(&SHAPE)
            .with("points", Value::list([point(0, ""), point(1, &long)]))
            .unwrap();
        let options = PackOptions {
            offset_width: OffsetWidth::U16,
            write_magic: false,
        };
        match pack(&rec, &ExcludePolicy::none(), options) {
            Err(Error::PackingOverflow { field, .. }) => assert_eq!(field, "Shape.points[1].label"),
            other => panic!("expected PackingOverflow, got {other:?}"),
        }
    }
}
