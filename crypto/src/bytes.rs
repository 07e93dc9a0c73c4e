//! Byte array type helpers.

/// Define a fixed-size byte array type with hex debug output and CBOR
/// byte-string encoding.
#[macro_export]
macro_rules! impl_bytes {
    ($name:ident, $size:expr, $doc:expr) => {
        #[doc=$doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $size]);

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name([0; $size])
            }
        }

        impl ::core::convert::TryFrom<&[u8]> for $name {
            type Error = $crate::Error;

            fn try_from(b: &[u8]) -> Result<$name, $crate::Error> {
                let data: [u8; $size] = b.try_into().map_err(|_| {
                    $crate::Error::InvalidInput(concat!(stringify!($name), ": invalid length"))
                })?;
                Ok($name(data))
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                use ::rustc_hex::ToHex;

                f.write_str(&self.0.to_hex::<String>())
            }
        }

        impl $crate::cbor::Encode for $name {
            fn into_cbor_value(self) -> $crate::cbor::Value {
                $crate::cbor::Value::ByteString(self.0.into())
            }
        }

        impl $crate::cbor::Decode for $name {
            fn try_default() -> Result<Self, $crate::cbor::DecodeError> {
                Ok(Default::default())
            }

            fn try_from_cbor_value(
                value: $crate::cbor::Value,
            ) -> Result<Self, $crate::cbor::DecodeError> {
                match value {
                    $crate::cbor::Value::ByteString(data) => Ok(Self(
                        data.try_into()
                            .map_err(|_| $crate::cbor::DecodeError::UnexpectedType)?,
                    )),
                    _ => Err($crate::cbor::DecodeError::UnexpectedType),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    const KEY_ID_BYTES: [u8; 16] = [
        0x6c, 0x65, 0x64, 0x67, 0x65, 0x72, 0x2d, 0x6b, 0x65, 0x79, 0x2d, 0x69, 0x64, 0x00, 0x01,
        0xff,
    ];

    impl_bytes!(KeyId, 16, "A key identifier.");

    #[test]
    fn test_invalid_length() {
        assert!(KeyId::try_from(&KEY_ID_BYTES[..15]).is_err());
        assert_eq!(KeyId::try_from(&KEY_ID_BYTES[..]), Ok(KeyId(KEY_ID_BYTES)));
    }

    #[test]
    fn test_cbor() {
        let key_id = KeyId(KEY_ID_BYTES);
        let encoded = cbor::to_vec(key_id);

        // Byte string header followed by the raw bytes.
        let mut expected = vec![0x50];
        expected.extend_from_slice(&KEY_ID_BYTES);
        assert_eq!(encoded, expected);

        let decoded: KeyId = cbor::from_slice(&encoded).unwrap();
        assert_eq!(decoded, key_id);

        // Wrong length byte strings do not decode.
        assert!(cbor::from_slice::<KeyId>(&cbor::to_vec(vec![0u8; 3])).is_err());
    }

    #[test]
    fn test_debug_is_hex() {
        assert_eq!(
            format!("{:?}", KeyId(KEY_ID_BYTES)),
            "6c65646765722d6b65792d69640001ff"
        );
    }
}
