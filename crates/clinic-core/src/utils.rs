//! 通用工具函数

use chrono::NaiveDate;
use uuid::Uuid;

/// 生成就诊编号，如 E20250825-1a2b3c4d
pub fn generate_encounter_no(date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("E{}-{}", date.format("%Y%m%d"), &suffix[..8])
}

/// 验证就诊编号格式
pub fn is_valid_encounter_no(no: &str) -> bool {
    // E + 8位日期 + '-' + 8位十六进制
    let bytes = no.as_bytes();
    if bytes.len() != 18 || bytes[0] != b'E' || bytes[9] != b'-' {
        return false;
    }
    bytes[1..9].iter().all(|b| b.is_ascii_digit())
        && bytes[10..].iter().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_encounter_no() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 25).unwrap();
        let no = generate_encounter_no(date);
        assert!(no.starts_with("E20250825-"));
        assert!(is_valid_encounter_no(&no));
    }

    #[test]
    fn test_is_valid_encounter_no() {
        assert!(is_valid_encounter_no("E20250825-1a2b3c4d"));
        assert!(!is_valid_encounter_no(""));
        assert!(!is_valid_encounter_no("E2025-xyz"));
        assert!(!is_valid_encounter_no("X20250825-1a2b3c4d"));
        // 多字节字符不会越界
        assert!(!is_valid_encounter_no("E2025082五-1a2b3c4d"));
    }
}
