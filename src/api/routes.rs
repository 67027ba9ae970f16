//! 资源路径：既是请求路径，也是缓存 key
//!
//! 相同资源必须得到相同 key；查询参数按名称排序后拼接。
//! 自由文本（成员姓名、参数键值）一律百分号编码，不同资源不会落到同一个 key。

use urlencoding::encode;

/// 报告矩阵类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Referral,
    OneToOne,
    Combination,
}

impl MatrixKind {
    fn segment(&self) -> &'static str {
        match self {
            Self::Referral => "referral-matrix",
            Self::OneToOne => "one-to-one-matrix",
            Self::Combination => "combination-matrix",
        }
    }
}

/// 两期报告对比的维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKind {
    Comprehensive,
    Referrals,
    OneToOnes,
    Combination,
}

impl ComparisonKind {
    fn segment(&self) -> &'static str {
        match self {
            Self::Comprehensive => "",
            Self::Referrals => "referrals/",
            Self::OneToOnes => "one-to-ones/",
            Self::Combination => "combination/",
        }
    }
}

pub fn dashboard() -> String {
    "dashboard/".to_string()
}

pub fn chapters() -> String {
    "chapters/".to_string()
}

pub fn chapter(chapter_id: u64) -> String {
    format!("chapters/{chapter_id}/")
}

pub fn members(chapter_id: u64) -> String {
    format!("chapters/{chapter_id}/members/")
}

pub fn member(chapter_id: u64, member_id: u64) -> String {
    format!("chapters/{chapter_id}/members/{member_id}/")
}

pub fn member_analytics(chapter_id: u64, member_name: &str) -> String {
    format!(
        "chapters/{chapter_id}/members/{}/analytics/",
        encode(member_name.trim())
    )
}

pub fn reports(chapter_id: u64) -> String {
    format!("chapters/{chapter_id}/reports/")
}

pub fn report(chapter_id: u64, report_id: u64) -> String {
    format!("chapters/{chapter_id}/reports/{report_id}/")
}

pub fn report_member(chapter_id: u64, report_id: u64, member_id: u64) -> String {
    format!("chapters/{chapter_id}/reports/{report_id}/members/{member_id}/")
}

pub fn report_tyfcb(chapter_id: u64, report_id: u64) -> String {
    format!("chapters/{chapter_id}/reports/{report_id}/tyfcb/")
}

pub fn matrix(chapter_id: u64, report_id: u64, kind: MatrixKind) -> String {
    format!("chapters/{chapter_id}/reports/{report_id}/{}/", kind.segment())
}

pub fn comparison(
    chapter_id: u64,
    report_id: u64,
    previous_report_id: u64,
    kind: ComparisonKind,
) -> String {
    format!(
        "chapters/{chapter_id}/reports/{report_id}/compare/{previous_report_id}/{}",
        kind.segment()
    )
}

/// 路径 + 查询参数；参数按名称排序，保证 key 稳定
pub fn query_key(path: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort();
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{query}")
}
