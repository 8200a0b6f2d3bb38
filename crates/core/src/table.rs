//! 플로우 테이블 -- 헤더가 있는 CSV 파일의 읽기/쓰기
//!
//! 플로우 파일과 분류 결과 파일은 모두 첫 행이 헤더인 CSV입니다.
//! 쉼표나 따옴표를 포함하는 필드(`"SYN, ACK"` 등)는 큰따옴표로 감싸고,
//! 필드 안의 따옴표는 `""`로 이스케이프합니다.

use crate::error::SchemaError;

/// 헤더와 행으로 구성된 문자열 테이블
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl FlowTable {
    /// 헤더만 있는 빈 테이블을 만듭니다.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// CSV 텍스트를 파싱합니다.
    ///
    /// 빈 줄은 건너뜁니다. 헤더와 필드 수가 다른 행은 에러입니다.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
            .filter(|(_, l)| !l.trim().is_empty());

        let (header_line, header) = lines.next().ok_or(SchemaError::MissingHeader)?;
        let headers: Vec<String> = split_line(header, header_line)?
            .into_iter()
            .map(|h| h.trim().to_owned())
            .collect();

        let mut rows = Vec::new();
        for (line_no, line) in lines {
            let fields = split_line(line, line_no)?;
            if fields.len() != headers.len() {
                return Err(SchemaError::RowWidth {
                    row: rows.len() + 1,
                    expected: headers.len(),
                    actual: fields.len(),
                });
            }
            rows.push(fields);
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 컬럼 이름으로 인덱스를 찾습니다.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// 행 하나를 추가합니다. 필드 수는 헤더와 같아야 합니다.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), SchemaError> {
        if row.len() != self.headers.len() {
            return Err(SchemaError::RowWidth {
                row: self.rows.len() + 1,
                expected: self.headers.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// 컬럼 하나를 오른쪽 끝에 추가합니다. 값의 개수는 행 수와 같아야 합니다.
    pub fn append_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<String>,
    ) -> Result<(), SchemaError> {
        if values.len() != self.rows.len() {
            return Err(SchemaError::RowWidth {
                row: values.len().min(self.rows.len()) + 1,
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        self.headers.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// 헤더 이름으로 한 행을 조회하는 뷰를 반환합니다.
    pub fn record(&self, index: usize) -> Option<Record<'_>> {
        self.rows.get(index).map(|fields| Record {
            headers: &self.headers,
            fields,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|fields| Record {
            headers: &self.headers,
            fields,
        })
    }

    /// CSV 텍스트로 직렬화합니다. 줄바꿈은 `\n`입니다.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_line(&mut out, &self.headers);
        for row in &self.rows {
            write_line(&mut out, row);
        }
        out
    }
}

/// 헤더 이름으로 필드에 접근하는 행 뷰
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    headers: &'a [String],
    fields: &'a [String],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    pub fn has(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn fields(&self) -> &'a [String] {
        self.fields
    }
}

fn split_line(line: &str, line_no: usize) -> Result<Vec<String>, SchemaError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(SchemaError::UnterminatedQuote { line: line_no });
    }
    fields.push(current);
    Ok(fields)
}

fn write_line(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}
