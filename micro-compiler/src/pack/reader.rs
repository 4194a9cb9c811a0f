use super::*;

/// Parse bytes produced by [`pack`](super::pack) with the same schema, policy and options.
/// Excluded fields come back at their defaults.
pub fn unpack(
    bytes: &[u8],
    schema: &'static RecordSchema,
    policy: &ExcludePolicy,
    options: PackOptions,
) -> Result<Record> {
    let body = if options.write_magic {
        let header = slice(bytes, 0, MAGIC_LEN, "magic")?;
        if header[..4] != MAGIC {
            return Err(Error::MalformedRecord("bad magic".into()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(Error::MalformedRecord(format!(
                "unsupported format version {version}"
            )));
        }
        if header[6] as usize != options.offset_width.bytes() {
            return Err(Error::MalformedRecord(format!(
                "blob uses {}-byte offsets, expected {}",
                header[6],
                options.offset_width.bytes()
            )));
        }
        &bytes[MAGIC_LEN..]
    } else {
        bytes
    };

    Reader {
        policy,
        width: options.offset_width,
    }
    .record(body, schema)
}

struct Reader<'a> {
    policy: &'a ExcludePolicy,
    width: OffsetWidth,
}

impl Reader<'_> {
    fn record(&self, buf: &[u8], schema: &'static RecordSchema) -> Result<Record> {
        let mut record = Record::new(schema);
        let mut pos = 0;

        for (i, field) in schema.fields.iter().enumerate() {
            if self.policy.excludes(schema.name, field.name) {
                continue;
            }
            let value = match field.kind {
                FieldKind::Scalar(kind) => {
                    let value = read_scalar(buf, pos, kind, field.name)?;
                    pos += kind.slot_size();
                    value
                }
                kind => {
                    let (offset, len) = self.read_slot(buf, pos, field.name)?;
                    pos += 2 * self.width.bytes();
                    self.payload(buf, offset, len, &kind, field.name)?
                }
            };
            record.values[i] = value;
        }

        Ok(record)
    }

    fn payload(
        &self,
        buf: &[u8],
        offset: usize,
        len: usize,
        kind: &FieldKind,
        name: &str,
    ) -> Result<Value> {
        if len == 0 {
            return Ok(kind.default_value());
        }
        let value = match kind {
            FieldKind::Str => Value::Str(utf8(slice(buf, offset, len, name)?, name)?),
            FieldKind::Bytes => Value::Bytes(slice(buf, offset, len, name)?.to_vec()),
            FieldKind::Record(schema) => {
                Value::Record(self.record(slice(buf, offset, len, name)?, *schema)?)
            }
            FieldKind::ScalarList(scalar) => {
                let size = scalar.slot_size();
                let data = slice(buf, offset, len * size, name)?;
                Value::List(
                    (0..len)
                        .map(|i| read_scalar(data, i * size, *scalar, name))
                        .collect::<Result<_>>()?,
                )
            }
            FieldKind::StrList | FieldKind::RecordList(_) => {
                let base = buf
                    .get(offset..)
                    .ok_or_else(|| truncated(name))?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    let (elem_offset, elem_len) =
                        self.read_slot(base, i * 2 * self.width.bytes(), name)?;
                    let elem = slice(base, elem_offset, elem_len, name)?;
                    items.push(match kind {
                        FieldKind::RecordList(schema) => Value::Record(self.record(elem, *schema)?),
                        _ => Value::Str(utf8(elem, name)?),
                    });
                }
                Value::List(items)
            }
            FieldKind::Scalar(_) => unreachable!("scalars have no payload"),
        };
        Ok(value)
    }

    fn read_slot(&self, buf: &[u8], pos: usize, name: &str) -> Result<(usize, usize)> {
        let w = self.width.bytes();
        let raw = slice(buf, pos, 2 * w, name)?;
        let read = |b: &[u8]| match self.width {
            OffsetWidth::U16 => u16::from_le_bytes([b[0], b[1]]) as usize,
            OffsetWidth::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize,
        };
        Ok((read(&raw[..w]), read(&raw[w..])))
    }
}

fn read_scalar(buf: &[u8], pos: usize, kind: ScalarKind, name: &str) -> Result<Value> {
    let b = slice(buf, pos, kind.slot_size(), name)?;
    let word = || [b[0], b[1], b[2], b[3]];
    Ok(match kind {
        ScalarKind::Bool => Value::Bool(u32::from_le_bytes(word()) != 0),
        ScalarKind::I32 => Value::I32(i32::from_le_bytes(word())),
        ScalarKind::U32 => Value::U32(u32::from_le_bytes(word())),
        ScalarKind::F32 => Value::F32(f32::from_le_bytes(word())),
        ScalarKind::I64 => Value::I64(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
    })
}

fn slice<'b>(buf: &'b [u8], offset: usize, len: usize, name: &str) -> Result<&'b [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| truncated(name))
}

fn utf8(bytes: &[u8], name: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::MalformedRecord(format!("field '{name}' is not valid UTF-8")))
}

fn truncated(name: &str) -> Error {
    Error::MalformedRecord(format!("truncated input at field '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::tests::{sample_shape, SHAPE};

    fn options(offset_width: OffsetWidth, write_magic: bool) -> PackOptions {
        PackOptions {
            offset_width,
            write_magic,
        }
    }

    #[test]
    fn round_trip_reconstructs_every_field() {
        let rec = sample_shape();
        for width in [OffsetWidth::U16, OffsetWidth::U32] {
            for magic in [false, true] {
                let opts = options(width, magic);
                let bytes = pack(&rec, &ExcludePolicy::none(), opts).unwrap();
                let back = unpack(&bytes, &SHAPE, &ExcludePolicy::none(), opts).unwrap();
                assert_eq!(back, rec);
            }
        }
    }

    #[test]
    fn excluded_fields_read_back_as_defaults() {
        let policy = ExcludePolicy::none().exclude("Shape", &["secret", "name"]);
        let rec = sample_shape();
        let bytes = pack(&rec, &policy, PackOptions::default()).unwrap();
        let back = unpack(&bytes, &SHAPE, &policy, PackOptions::default()).unwrap();

        assert_eq!(back.get("secret"), Some(&Value::I64(0)));
        assert_eq!(back.get("name"), Some(&Value::Str(String::new())));
        assert_eq!(back.get("dims"), rec.get("dims"));
        assert_eq!(back.get("points"), rec.get("points"));
    }

    #[test]
    fn rejects_truncated_and_foreign_input() {
        let opts = options(OffsetWidth::U32, true);
        let bytes = pack(&sample_shape(), &ExcludePolicy::none(), opts).unwrap();

        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            unpack(cut, &SHAPE, &ExcludePolicy::none(), opts),
            Err(Error::MalformedRecord(_))
        ));

        let mut foreign = bytes.clone();
        foreign[0] = b'X';
        assert!(unpack(&foreign, &SHAPE, &ExcludePolicy::none(), opts).is_err());

        let narrow = options(OffsetWidth::U16, true);
        assert!(unpack(&bytes, &SHAPE, &ExcludePolicy::none(), narrow).is_err());
    }
}
