//! `dig`-style `Display` for [`Message`], grounded on
//! `rustdns::display`'s `impl fmt::Display for Message`.

use std::fmt;

use crate::wire::message::{Message, Question};

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            ";; ->>HEADER<<- opcode: {opcode}, status: {rcode}, id: {id}",
            opcode = self.flags.opcode,
            rcode = self.flags.rcode,
            id = self.id,
        )?;

        let mut flags = String::new();
        if self.flags.qr.to_bool() {
            flags.push_str(" qr");
        }
        if self.flags.aa {
            flags.push_str(" aa");
        }
        if self.flags.tc {
            flags.push_str(" tc");
        }
        if self.flags.rd {
            flags.push_str(" rd");
        }
        if self.flags.ra {
            flags.push_str(" ra");
        }

        writeln!(
            f,
            ";; flags:{flags}; QUERY: {qd}, ANSWER: {an}, AUTHORITY: {ns}, ADDITIONAL: {ar}",
            flags = flags,
            qd = self.questions.len(),
            an = self.answers.len(),
            ns = self.authorities.len(),
            ar = self.additionals.len(),
        )?;
        writeln!(f)?;

        writeln!(f, ";; QUESTION SECTION:")?;
        for q in &self.questions {
            q.fmt(f)?;
        }

        if !self.answers.is_empty() {
            writeln!(f, "; ANSWER SECTION:")?;
            for r in &self.answers {
                writeln!(f, "{}", r)?;
            }
        }

        if !self.authorities.is_empty() {
            writeln!(f, "; AUTHORITY SECTION:")?;
            for r in &self.authorities {
                writeln!(f, "{}", r)?;
            }
        }

        if !self.additionals.is_empty() {
            writeln!(f, "; ADDITIONAL SECTION:")?;
            for r in &self.additionals {
                writeln!(f, "{}", r)?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "; {name:<20} {class:4} {type:6}{qu}",
            name = self.name,
            class = self.qclass,
            r#type = self.qtype,
            qu = if self.qu { " (QU)" } else { "" },
        )
    }
}
