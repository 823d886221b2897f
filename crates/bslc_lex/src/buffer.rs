//! Token buffer passes: tokenization and token merging.
//!
//! All passes operate on parallel `types`/`offsets` arrays. Token `i` covers
//! the byte range `offsets[i] .. offsets[i + 1]`; the arrays always end with
//! an end-of-file sentinel whose offset equals the input length, so every
//! input byte belongs to exactly one token.
//!
//! Merging passes compact the arrays in place: the read cursor always runs
//! ahead of the write cursor, so no scratch allocation is needed.

use crate::class::{char_class, CHAR_CLASS_TABLE, TokenType};

/// Shuffle table used for stream compaction: for each 8-bit keep-mask, the
/// lane indices of the kept elements, front-packed.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
static SHUFFLE_TABLE_8: [[u8; 8]; 256] = build_shuffle_table();

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const fn build_shuffle_table() -> [[u8; 8]; 256] {
    let mut table = [[0u8; 8]; 256];
    let mut mask = 0usize;
    while mask < 256 {
        let mut out = 0usize;
        let mut bit = 0usize;
        while bit < 8 {
            if mask & (1 << bit) != 0 {
                table[mask][out] = bit as u8;
                out += 1;
            }
            bit += 1;
        }
        mask += 1;
    }
    table
}

/// Tokenizes `src` by grouping contiguous characters of the same class.
///
/// Identifies runs of characters mapping to the same [`char_class`] value.
/// Only classes sharing a [`char_class::CAN_MERGE`] bit group; classes above
/// [`char_class::CLASS_TO_TYPE_THRESHOLD`] become the token type directly,
/// anything else uses the first character of the run.
///
/// Processes 16 bytes at a time where SIMD is available; the scalar tail and
/// the scalar-only fallback produce bit-identical output.
pub fn tokenize(src: &[u8], types: &mut Vec<u8>, offsets: &mut Vec<u32>) {
    assert!(src.len() < u32::MAX as usize);

    types.clear();
    offsets.clear();
    // One slot per input byte plus the sentinel, plus slack for the vector
    // stores which can write up to 16 lanes past the live cursor.
    types.resize(src.len() + 17, 0);
    offsets.resize(src.len() + 17, 0);

    let mut cursor = 0usize;
    let mut offset = 0usize;
    let mut prev_class = char_class::NONE;

    #[cfg(target_arch = "x86_64")]
    if src.len() >= 16
        && std::arch::is_x86_feature_detected!("ssse3")
        && std::arch::is_x86_feature_detected!("sse4.1")
    {
        // SAFETY: feature support checked above; buffers carry 16 lanes of
        // slack past the densest possible output.
        let (c, o, p) = unsafe { sse::tokenize_vectors(src, types, offsets) };
        cursor = c;
        offset = o;
        prev_class = p;
    }

    #[cfg(target_arch = "aarch64")]
    if src.len() >= 16 {
        // SAFETY: NEON is baseline on aarch64; buffers carry 16 lanes of
        // slack past the densest possible output.
        let (c, o, p) = unsafe { neon::tokenize_vectors(src, types, offsets) };
        cursor = c;
        offset = o;
        prev_class = p;
    }

    // Scalar tail, also the full fallback when no vector path ran.
    while offset < src.len() {
        let byte = src[offset];
        let class = CHAR_CLASS_TABLE[byte as usize];
        // Overwriting the next free slot on merge is cheaper than a branch.
        types[cursor] = if class > char_class::CLASS_TO_TYPE_THRESHOLD {
            class
        } else {
            byte
        };
        offsets[cursor] = offset as u32;
        cursor += usize::from(class & prev_class & char_class::CAN_MERGE == 0);
        prev_class = class;
        offset += 1;
    }

    types[cursor] = TokenType::END_OF_FILE.0;
    offsets[cursor] = src.len() as u32;
    types.truncate(cursor + 1);
    offsets.truncate(cursor + 1);
}

#[cfg(target_arch = "x86_64")]
mod sse {
    use super::SHUFFLE_TABLE_8;
    use crate::class::{char_class, CHAR_CLASS_TABLE};
    use core::arch::x86_64::*;

    /// Full-ASCII table transform: 8 sub-tables of 16 entries, selected by
    /// the high nibble, shuffled by the low 4 bits.
    #[target_feature(enable = "ssse3", enable = "sse4.1")]
    unsafe fn transform16_ascii(table: &[__m128i; 8], input: __m128i) -> __m128i {
        let mut result = _mm_setzero_si128();
        let high_nibble_mask = _mm_set1_epi8(0xF0u8 as i8);
        for (i, sub) in table.iter().enumerate() {
            let range_match = _mm_cmpeq_epi8(
                _mm_and_si128(input, high_nibble_mask),
                _mm_set1_epi8((i << 4) as i8),
            );
            let lookup = _mm_shuffle_epi8(*sub, input);
            result = _mm_or_si128(result, _mm_and_si128(lookup, range_match));
        }
        result
    }

    /// Compacts one 8-lane chunk based on the emit mask and advances the
    /// cursor by the number of surviving lanes.
    #[target_feature(enable = "ssse3", enable = "sse4.1")]
    unsafe fn compact8(
        mask: u8,
        data: __m128i,
        base_offset: u32,
        types: &mut [u8],
        offsets: &mut [u32],
        cursor: usize,
    ) -> usize {
        let shuffle = _mm_loadl_epi64(SHUFFLE_TABLE_8[mask as usize].as_ptr() as *const __m128i);
        let compacted = _mm_shuffle_epi8(data, shuffle);
        _mm_storel_epi64(types.as_mut_ptr().add(cursor) as *mut __m128i, compacted);

        // The surviving lane indices double as relative offsets. Promote to
        // 32 bits and add the block base.
        let shuffle32_lo = _mm_cvtepu8_epi32(shuffle);
        let shuffle32_hi = _mm_cvtepu8_epi32(_mm_srli_si128::<4>(shuffle));
        let base = _mm_set1_epi32(base_offset as i32);
        _mm_storeu_si128(
            offsets.as_mut_ptr().add(cursor) as *mut __m128i,
            _mm_add_epi32(shuffle32_lo, base),
        );
        _mm_storeu_si128(
            offsets.as_mut_ptr().add(cursor + 4) as *mut __m128i,
            _mm_add_epi32(shuffle32_hi, base),
        );
        cursor + mask.count_ones() as usize
    }

    /// Vector loop covering all complete 16-byte blocks. Returns the write
    /// cursor, the next unprocessed byte offset, and the class of the last
    /// processed byte for the scalar tail.
    #[target_feature(enable = "ssse3", enable = "sse4.1")]
    pub unsafe fn tokenize_vectors(
        src: &[u8],
        types: &mut [u8],
        offsets: &mut [u32],
    ) -> (usize, usize, u8) {
        let mut table = [_mm_setzero_si128(); 8];
        for (i, sub) in table.iter_mut().enumerate() {
            *sub = _mm_loadu_si128(CHAR_CLASS_TABLE.as_ptr().add(i * 16) as *const __m128i);
        }

        let mask_last = _mm_set_epi8(-1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        let mut prev = _mm_set1_epi8(char_class::NONE as i8);

        let mut cursor = 0usize;
        let mut offset = 0usize;
        while offset + 16 <= src.len() {
            let chars = _mm_loadu_si128(src.as_ptr().add(offset) as *const __m128i);
            let curr = transform16_ascii(&table, chars);
            // (curr > threshold) ? type(curr) : type(char)
            let mask_t = _mm_cmpgt_epi8(
                curr,
                _mm_set1_epi8(char_class::CLASS_TO_TYPE_THRESHOLD as i8),
            );
            let token_type = _mm_blendv_epi8(chars, curr, mask_t);
            // Carry the last class of the previous block into lane 15, then
            // rotate right one lane so lane i holds the class of byte i-1.
            prev = _mm_blendv_epi8(curr, prev, mask_last);
            prev = _mm_alignr_epi8::<15>(prev, prev);
            // Equivalent to `!bool(curr & prev & CAN_MERGE)`.
            let can_merge = _mm_set1_epi8(char_class::CAN_MERGE as i8);
            let combined = _mm_and_si128(_mm_and_si128(curr, prev), can_merge);
            let emit = _mm_cmpeq_epi8(combined, _mm_setzero_si128());

            let mask = _mm_movemask_epi8(emit) as u32;
            cursor = compact8(mask as u8, token_type, offset as u32, types, offsets, cursor);
            cursor = compact8(
                (mask >> 8) as u8,
                _mm_srli_si128::<8>(token_type),
                offset as u32 + 8,
                types,
                offsets,
                cursor,
            );

            prev = curr;
            offset += 16;
        }

        let last_class = _mm_extract_epi8::<15>(prev) as u8;
        (cursor, offset, last_class)
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use super::SHUFFLE_TABLE_8;
    use crate::class::{char_class, CHAR_CLASS_TABLE};
    use core::arch::aarch64::*;

    /// Vector loop covering all complete 16-byte blocks. Returns the write
    /// cursor, the next unprocessed byte offset, and the class of the last
    /// processed byte for the scalar tail.
    pub unsafe fn tokenize_vectors(
        src: &[u8],
        types: &mut [u8],
        offsets: &mut [u32],
    ) -> (usize, usize, u8) {
        let table_ptr = CHAR_CLASS_TABLE.as_ptr();
        let table_lo = uint8x16x4_t(
            vld1q_u8(table_ptr),
            vld1q_u8(table_ptr.add(16)),
            vld1q_u8(table_ptr.add(32)),
            vld1q_u8(table_ptr.add(48)),
        );
        let table_hi = uint8x16x4_t(
            vld1q_u8(table_ptr.add(64)),
            vld1q_u8(table_ptr.add(80)),
            vld1q_u8(table_ptr.add(96)),
            vld1q_u8(table_ptr.add(112)),
        );

        let last_lane: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF];
        let mask_last = vld1q_u8(last_lane.as_ptr());
        let bit_select: [u8; 16] = [1, 2, 4, 8, 16, 32, 64, 128, 1, 2, 4, 8, 16, 32, 64, 128];
        let mask_comp = vld1q_u8(bit_select.as_ptr());

        let mut prev = vdupq_n_u8(char_class::NONE);
        let mut cursor = 0usize;
        let mut offset = 0usize;
        while offset + 16 <= src.len() {
            let chars = vld1q_u8(src.as_ptr().add(offset));
            let curr = {
                let lo = vqtbl4q_u8(table_lo, chars);
                let hi = vqtbl4q_u8(table_hi, veorq_u8(chars, vdupq_n_u8(0x40)));
                vorrq_u8(lo, hi)
            };
            // (curr > threshold) ? type(curr) : type(char)
            let mask_t = vcgtq_s8(
                vreinterpretq_s8_u8(curr),
                vdupq_n_s8(char_class::CLASS_TO_TYPE_THRESHOLD as i8),
            );
            let token_type = vbslq_u8(mask_t, curr, chars);
            // Carry the last class of the previous block into lane 15, then
            // rotate right one lane so lane i holds the class of byte i-1.
            prev = vbslq_u8(mask_last, prev, curr);
            prev = vextq_u8::<15>(prev, prev);
            // Equivalent to `!bool(curr & prev & CAN_MERGE)`.
            let can_merge = vdupq_n_u8(char_class::CAN_MERGE);
            let emit = vceqq_u8(vandq_u8(vandq_u8(curr, prev), can_merge), vdupq_n_u8(0));

            // One bit per surviving lane, summed into an 8-bit mask per half.
            let mask_vec = vandq_u8(emit, mask_comp);
            let mask_lo = vaddv_u8(vget_low_u8(mask_vec)) as usize;
            let mask_hi = vaddv_u8(vget_high_u8(mask_vec)) as usize;

            let shuffle_lo = vld1_u8(SHUFFLE_TABLE_8[mask_lo].as_ptr());
            let shuffle_hi = vld1_u8(SHUFFLE_TABLE_8[mask_hi].as_ptr());

            // Low half.
            let data_lo = vtbl1_u8(vget_low_u8(token_type), shuffle_lo);
            vst1_u8(types.as_mut_ptr().add(cursor), data_lo);
            let sh16 = vmovl_u8(shuffle_lo);
            let base = vdupq_n_u32(offset as u32);
            vst1q_u32(
                offsets.as_mut_ptr().add(cursor),
                vaddq_u32(vmovl_u16(vget_low_u16(sh16)), base),
            );
            vst1q_u32(
                offsets.as_mut_ptr().add(cursor + 4),
                vaddq_u32(vmovl_u16(vget_high_u16(sh16)), base),
            );
            cursor += (mask_lo as u8).count_ones() as usize;

            // High half.
            let data_hi = vtbl1_u8(vget_high_u8(token_type), shuffle_hi);
            vst1_u8(types.as_mut_ptr().add(cursor), data_hi);
            let sh16 = vmovl_u8(shuffle_hi);
            let base = vdupq_n_u32(offset as u32 + 8);
            vst1q_u32(
                offsets.as_mut_ptr().add(cursor),
                vaddq_u32(vmovl_u16(vget_low_u16(sh16)), base),
            );
            vst1q_u32(
                offsets.as_mut_ptr().add(cursor + 4),
                vaddq_u32(vmovl_u16(vget_high_u16(sh16)), base),
            );
            cursor += (mask_hi as u8).count_ones() as usize;

            prev = curr;
            offset += 16;
        }

        let last_class = vgetq_lane_u8::<15>(prev);
        (cursor, offset, last_class)
    }
}

/// Collapses the two-character operators into single tokens with their own
/// types, and retypes class-merged runs whose spelling is a known operator.
///
/// Pair merges only fire on directly adjacent single-character tokens, so
/// `a - > b` stays three tokens while `a->b` produces one `Deref`.
pub fn merge_punctuation(src: &[u8], types: &mut Vec<u8>, offsets: &mut Vec<u32>) {
    let count = types.len() - 1;
    let mut out = 0usize;
    for i in 0..count {
        let ty = types[i];
        let start = offsets[i];
        let end = offsets[i + 1];
        let spelling = &src[start as usize..end as usize];

        let retyped = match spelling {
            b"==" => TokenType::EQUAL.0,
            b"!=" => TokenType::NOT_EQUAL.0,
            b"++" => TokenType::INCREMENT.0,
            b"--" => TokenType::DECREMENT.0,
            b"&&" => TokenType::LOGICAL_AND.0,
            b"||" => TokenType::LOGICAL_OR.0,
            _ => ty,
        };

        if out > 0 {
            let prev_ty = types[out - 1];
            let prev_is_single = start - offsets[out - 1] == 1;
            let merged = match (prev_ty, ty) {
                (b'<', b'=') if prev_is_single && spelling == b"=" => Some(TokenType::LEQUAL),
                (b'>', b'=') if prev_is_single && spelling == b"=" => Some(TokenType::GEQUAL),
                (b'-', b'>') if prev_is_single && spelling == b">" => Some(TokenType::DEREF),
                (b'\\', b'\n') if prev_is_single => Some(TokenType::PREPROCESSOR_NEWLINE),
                _ => None,
            };
            if let Some(merged) = merged {
                types[out - 1] = merged.0;
                continue;
            }
        }

        types[out] = retyped;
        offsets[out] = start;
        out += 1;
    }

    types[out] = TokenType::END_OF_FILE.0;
    offsets[out] = src.len() as u32;
    types.truncate(out + 1);
    offsets.truncate(out + 1);
}

fn lex_string(types: &[u8], cursor: &mut usize) {
    let last = types.len() - 1;
    while *cursor < last {
        *cursor += 1;
        if types[*cursor] == b'\\' {
            // Escaped character. Skip next.
            *cursor += 1;
            continue;
        }
        if types[*cursor] == TokenType::STRING.0 || types[*cursor] == TokenType::END_OF_FILE.0 {
            return;
        }
    }
}

fn lex_number(src: &[u8], types: &[u8], offsets: &[u32], cursor: &mut usize) {
    loop {
        *cursor += 1;
        let ty = types[*cursor];
        let start = offsets[*cursor] as usize;
        // A sign only continues the literal right after an exponent "e".
        if (ty == b'+' || ty == b'-') && src[start - 1] != b'e' {
            break;
        }
        if !(ty == TokenType::WORD.0
            || ty == TokenType::NUMBER.0
            || ty == b'.'
            || ty == b'+'
            || ty == b'-')
        {
            break;
        }
    }
    // Re-evaluate the token we broke on.
    *cursor -= 1;
}

/// Merges complex literals: strings (with escape handling) and numbers
/// (hex digits, `u`/`f` suffixes, decimal point, signed exponents).
pub fn merge_complex_literals(src: &[u8], types: &mut Vec<u8>, offsets: &mut Vec<u32>) {
    let count = types.len() - 1;
    let mut out = 0usize;
    let mut i = 0usize;
    while i < count {
        types[out] = types[i];
        offsets[out] = offsets[i];

        match types[out] {
            t if t == TokenType::STRING.0 => lex_string(types, &mut i),
            t if t == TokenType::NUMBER.0 => lex_number(src, types, offsets, &mut i),
            _ => {}
        }

        out += 1;
        i += 1;
    }

    types[out] = TokenType::END_OF_FILE.0;
    offsets[out] = src.len() as u32;
    types.truncate(out + 1);
    offsets.truncate(out + 1);
}

/// Merges whitespace tokens into their predecessor's range.
///
/// `original_offsets[i + 1]` keeps the pre-merge end of token `i`, so token
/// spellings stay recoverable without the attached whitespace.
///
/// Newlines terminating a preprocessor directive survive as their own
/// tokens: the scope builder needs them to close `Preprocessor` scopes.
pub fn merge_whitespaces(
    src_len: usize,
    types: &mut Vec<u8>,
    offsets: &mut Vec<u32>,
    original_offsets: &mut Vec<u32>,
) {
    let count = types.len() - 1;

    original_offsets.clear();
    original_offsets.resize(types.len(), 0);
    original_offsets[0] = 0;

    let mut out = 0usize;
    let mut in_directive = false;
    if count > 0 {
        original_offsets[1] = offsets[1];
        in_directive = types[0] == TokenType::HASH.0;
        out = 1;
    }

    for i in 1..count {
        types[out] = types[i];
        offsets[out] = offsets[i];
        original_offsets[out + 1] = offsets[i + 1];

        let ty = types[out];
        let merges = ty == TokenType::SPACE.0 || (ty == TokenType::NEW_LINE.0 && !in_directive);
        if ty == TokenType::HASH.0 {
            in_directive = true;
        } else if ty == TokenType::NEW_LINE.0 && in_directive {
            in_directive = false;
        }
        if merges {
            // Next token overwrites this slot, extending the previous
            // token's range over the whitespace.
            continue;
        }
        out += 1;
    }

    types[out] = TokenType::END_OF_FILE.0;
    offsets[out] = src_len as u32;
    original_offsets[out] = src_len as u32;
    types.truncate(out + 1);
    offsets.truncate(out + 1);
    original_offsets.truncate(out + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> (Vec<u8>, Vec<u32>) {
        let mut types = Vec::new();
        let mut offsets = Vec::new();
        tokenize(src.as_bytes(), &mut types, &mut offsets);
        (types, offsets)
    }

    fn spellings<'a>(src: &'a str, types: &[u8], offsets: &[u32]) -> Vec<&'a str> {
        (0..types.len() - 1)
            .map(|i| &src[offsets[i] as usize..offsets[i + 1] as usize])
            .collect()
    }

    #[test]
    fn empty_input_yields_only_sentinel() {
        let (types, offsets) = lex("");
        assert_eq!(types, vec![0]);
        assert_eq!(offsets, vec![0]);
    }

    #[test]
    fn every_byte_is_covered_and_offsets_non_decreasing() {
        let src = "void fn(int a) { return a + 1.5f; }\n";
        let (types, offsets) = lex(src);
        assert_eq!(*offsets.last().unwrap() as usize, src.len());
        assert_eq!(types.last(), Some(&0));
        for pair in offsets.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(offsets[0], 0);
    }

    #[test]
    fn words_absorb_digits_but_not_the_reverse_split() {
        let src = "abc2 0x1F";
        let (types, offsets) = lex(src);
        let spell = spellings(src, &types, &offsets);
        assert_eq!(spell, vec!["abc2", " ", "0x1F"]);
        assert_eq!(types[0], TokenType::WORD.0);
        // Runs take the class of their first character.
        assert_eq!(types[2], TokenType::NUMBER.0);
    }

    #[test]
    fn separators_never_group() {
        let src = "(()) >>";
        let (types, offsets) = lex(src);
        let spell = spellings(src, &types, &offsets);
        assert_eq!(spell, vec!["(", "(", ")", ")", " ", ">", ">"]);
    }

    #[test]
    fn multi_tok_runs_group() {
        let src = "a==b";
        let (types, offsets) = lex(src);
        let spell = spellings(src, &types, &offsets);
        assert_eq!(spell, vec!["a", "==", "b"]);
    }

    #[test]
    fn scalar_and_vector_paths_agree_on_long_input() {
        // Long enough to exercise several full 16-byte blocks plus a tail.
        let src = "template<typename T> T read(T a) { return a * 2.0f + offset[i]; } // x\n"
            .repeat(8);
        let (types, offsets) = lex(&src);
        // Reference: plain scalar loop.
        let mut ref_types = Vec::new();
        let mut ref_offsets = Vec::new();
        let mut prev = char_class::NONE;
        let mut cursor = 0usize;
        ref_types.resize(src.len() + 1, 0);
        ref_offsets.resize(src.len() + 1, 0);
        for (offset, &byte) in src.as_bytes().iter().enumerate() {
            let class = CHAR_CLASS_TABLE[byte as usize];
            ref_types[cursor] = if class > char_class::CLASS_TO_TYPE_THRESHOLD {
                class
            } else {
                byte
            };
            ref_offsets[cursor] = offset as u32;
            cursor += usize::from(class & prev & char_class::CAN_MERGE == 0);
            prev = class;
        }
        ref_types[cursor] = 0;
        ref_offsets[cursor] = src.len() as u32;
        ref_types.truncate(cursor + 1);
        ref_offsets.truncate(cursor + 1);

        assert_eq!(types, ref_types);
        assert_eq!(offsets, ref_offsets);
    }

    #[test]
    fn punctuation_pairs_merge_with_dedicated_types() {
        let src = "a <= b >= c -> d != e == f ++ -- && || \\\n";
        let (mut types, mut offsets) = lex(src);
        merge_punctuation(src.as_bytes(), &mut types, &mut offsets);
        let merged: Vec<u8> = types.clone();
        assert!(merged.contains(&TokenType::LEQUAL.0));
        assert!(merged.contains(&TokenType::GEQUAL.0));
        assert!(merged.contains(&TokenType::DEREF.0));
        assert!(merged.contains(&TokenType::NOT_EQUAL.0));
        assert!(merged.contains(&TokenType::EQUAL.0));
        assert!(merged.contains(&TokenType::INCREMENT.0));
        assert!(merged.contains(&TokenType::DECREMENT.0));
        assert!(merged.contains(&TokenType::LOGICAL_AND.0));
        assert!(merged.contains(&TokenType::LOGICAL_OR.0));
        assert!(merged.contains(&TokenType::PREPROCESSOR_NEWLINE.0));
        assert_eq!(*offsets.last().unwrap() as usize, src.len());
    }

    #[test]
    fn spaced_operators_do_not_pair_merge() {
        let src = "a < = b";
        let (mut types, mut offsets) = lex(src);
        merge_punctuation(src.as_bytes(), &mut types, &mut offsets);
        assert!(!types.contains(&TokenType::LEQUAL.0));
    }

    #[test]
    fn scope_resolution_stays_one_token() {
        let src = "A::B";
        let (types, offsets) = lex(src);
        let spell = spellings(src, &types, &offsets);
        assert_eq!(spell, vec!["A", "::", "B"]);
        assert_eq!(types[1], b':');
    }

    #[test]
    fn string_literals_merge_with_escapes() {
        let src = "x = \"a \\\" b\" + 1;";
        let (mut types, mut offsets) = lex(src);
        merge_punctuation(src.as_bytes(), &mut types, &mut offsets);
        merge_complex_literals(src.as_bytes(), &mut types, &mut offsets);
        let spell = spellings(src, &types, &offsets);
        assert!(spell.contains(&"\"a \\\" b\""));
    }

    #[test]
    fn unterminated_string_stops_at_end_of_file() {
        let src = "\"abc";
        let (mut types, mut offsets) = lex(src);
        merge_complex_literals(src.as_bytes(), &mut types, &mut offsets);
        assert_eq!(*offsets.last().unwrap() as usize, src.len());
    }

    #[test]
    fn float_literals_merge_fully() {
        for (src, expect) in [
            ("x = 1.5f;", "1.5f"),
            ("x = 0x1Fu;", "0x1Fu"),
            ("x = 1e-5;", "1e-5"),
            ("x = 1.5e+10f;", "1.5e+10f"),
        ] {
            let (mut types, mut offsets) = lex(src);
            merge_punctuation(src.as_bytes(), &mut types, &mut offsets);
            merge_complex_literals(src.as_bytes(), &mut types, &mut offsets);
            let spell = spellings(src, &types, &offsets);
            assert!(spell.contains(&expect), "missing {expect:?} in {spell:?}");
        }
    }

    #[test]
    fn subtraction_is_not_absorbed_into_literal() {
        let src = "x = 2-1;";
        let (mut types, mut offsets) = lex(src);
        merge_punctuation(src.as_bytes(), &mut types, &mut offsets);
        merge_complex_literals(src.as_bytes(), &mut types, &mut offsets);
        let spell = spellings(src, &types, &offsets);
        assert!(spell.contains(&"2"));
        assert!(spell.contains(&"-"));
        assert!(spell.contains(&"1"));
    }

    #[test]
    fn whitespace_merges_into_predecessor() {
        let src = "int  a;\nfloat b;\n";
        let (mut types, mut offsets) = lex(src);
        let mut original = Vec::new();
        merge_whitespaces(src.len(), &mut types, &mut offsets, &mut original);
        let spell = spellings(src, &types, &offsets);
        assert_eq!(spell, vec!["int  ", "a", ";\n", "float ", "b", ";\n"]);
        // Content ends are preserved in the parallel array.
        assert_eq!(&src[offsets[0] as usize..original[1] as usize], "int");
        assert_eq!(&src[offsets[2] as usize..original[3] as usize], ";");
    }

    #[test]
    fn directive_terminating_newline_survives_merging() {
        let src = "#define A 1\nint a;\n";
        let (mut types, mut offsets) = lex(src);
        let mut original = Vec::new();
        merge_whitespaces(src.len(), &mut types, &mut offsets, &mut original);
        let newline_count = types.iter().filter(|&&t| t == b'\n').count();
        // Only the directive's newline is kept; the one after `int a;`
        // merges into the semicolon.
        assert_eq!(newline_count, 1);
        let spell = spellings(src, &types, &offsets);
        assert!(spell.contains(&"\n"));
    }
}
