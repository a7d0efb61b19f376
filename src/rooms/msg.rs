use time::format_description::well_known::Rfc3339;

use crate::{chat::Message, include_res, res};

pub(crate) fn msg_to_html(msg: &Message) -> String {
    let time = msg.timestamp.format(&Rfc3339).unwrap_or_default();

    include_res!(str, "/pages/rooms/message.html")
        .replace("{id}", &msg.id.to_string())
        .replace("{time}", &time)
        .replace("{sender}", &res::escape_text(&msg.sender))
        .replace("{content}", &res::markdown_html(&msg.body))
}
