use super::encoding::{form_decode, form_encode};
use super::types::{
    ClientWatchSet, ConfigKey, LINE_SEPARATOR, MAX_FIELDS_PER_RECORD, MAX_WATCH_ENTRIES, ProtocolError,
    WORD_SEPARATOR,
};

/// 解析客户端上送的监听报文
///
/// 每条记录为 `dataId W group [W tenant] W md5 L`，两种格式仅靠字段数区分：
/// 结束符前两个字段为旧格式，三个字段为带租户的新格式。
pub fn decode_watch_set(wire: &str) -> Result<ClientWatchSet, ProtocolError> {
    let mut watch_set = ClientWatchSet::new();
    if wire.is_empty() {
        return Ok(watch_set);
    }

    let mut fields: [&str; MAX_FIELDS_PER_RECORD] = [""; MAX_FIELDS_PER_RECORD];
    let mut count = 0usize;
    let mut start = 0usize;

    // 分隔符都是单字节 ASCII，按字节下标切片是安全的
    for (i, c) in wire.char_indices() {
        if c == WORD_SEPARATOR {
            if count == MAX_FIELDS_PER_RECORD {
                return Err(ProtocolError::TooManyFields {
                    max: MAX_FIELDS_PER_RECORD,
                });
            }
            fields[count] = &wire[start..i];
            count += 1;
            start = i + 1;
        } else if c == LINE_SEPARATOR {
            let md5 = &wire[start..i];
            start = i + 1;

            // dataId 和 group 不能为空
            if count >= 2 && (fields[0].is_empty() || fields[1].is_empty()) {
                return Err(ProtocolError::MalformedRecord { fields: count + 1 });
            }
            let key = match count {
                2 => ConfigKey::from_parts(fields[0], fields[1], None),
                3 => ConfigKey::from_parts(fields[0], fields[1], Some(fields[2])),
                _ => return Err(ProtocolError::MalformedRecord { fields: count + 1 }),
            };
            watch_set.insert(&key, md5);
            count = 0;

            if watch_set.len() > MAX_WATCH_ENTRIES {
                return Err(ProtocolError::TooManyListeners {
                    limit: MAX_WATCH_ENTRIES,
                });
            }
        }
    }

    Ok(watch_set)
}

/// 生成客户端监听报文，与 [`decode_watch_set`] 互逆
pub fn encode_watch_set(watch_set: &ClientWatchSet) -> Result<String, ProtocolError> {
    let mut sb = String::new();
    for (group_key, md5) in watch_set.iter() {
        let key = ConfigKey::parse_group_key(group_key)?;
        sb.push_str(&key.data_id);
        sb.push(WORD_SEPARATOR);
        sb.push_str(&key.group);
        if let Some(tenant) = &key.tenant {
            sb.push(WORD_SEPARATOR);
            sb.push_str(tenant);
        }
        sb.push(WORD_SEPARATOR);
        sb.push_str(md5);
        sb.push(LINE_SEPARATOR);
    }
    Ok(sb)
}

/// 将变更的配置拼接并做 URL 编码，不可见分隔符编码为 %02 和 %01
pub fn encode_changed_keys(changed_keys: &[ConfigKey]) -> String {
    let mut sb = String::new();
    for key in changed_keys {
        sb.push_str(&key.data_id);
        sb.push(WORD_SEPARATOR);
        sb.push_str(&key.group);
        if let Some(tenant) = key.tenant.as_deref().filter(|t| !t.trim().is_empty()) {
            sb.push(WORD_SEPARATOR);
            sb.push_str(tenant);
        }
        sb.push(LINE_SEPARATOR);
    }
    form_encode(&sb)
}

/// 仅用于日志输出的旧格式: `dataId:group;`
pub fn encode_changed_keys_debug(changed_keys: &[ConfigKey]) -> String {
    let mut sb = String::new();
    for key in changed_keys {
        sb.push_str(&key.data_id);
        sb.push(':');
        sb.push_str(&key.group);
        sb.push(';');
    }
    sb
}

/// 客户端解析服务端返回的变更列表
pub fn decode_changed_keys(response: &str) -> Result<Vec<ConfigKey>, ProtocolError> {
    let decoded = form_decode(response)?;
    let mut keys = Vec::new();

    for line in decoded.split(LINE_SEPARATOR).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split(WORD_SEPARATOR).collect();
        let key = match parts.as_slice() {
            [data_id, group] => ConfigKey::from_parts(data_id, group, None),
            [data_id, group, tenant] => ConfigKey::from_parts(data_id, group, Some(*tenant)),
            _ => {
                return Err(ProtocolError::MalformedRecord { fields: parts.len() });
            }
        };
        keys.push(key);
    }

    Ok(keys)
}
