//! Ast -> Expression visitor (spec §4.3, component E). Performs the only
//! semantic checks the engine does ahead of evaluation: function arity and
//! unknown function/constant names. Everything else (type mismatches,
//! comparisons across incompatible categories) is deferred to evaluation,
//! since FHIRPath has no static type system to check it against.

use crate::ast::{Ast, AdditiveOp, EqualityOp, InequalityOp, MembershipOp, MultiplicativeOp, OrOp, PolarityOp, TypeOp};
use crate::error::{Error, Result};
use crate::expr::*;
use fhirkit_values::Element;

/// Compile FHIRPath source into an evaluable expression tree.
pub fn compile(source: &str) -> Result<Expr> {
    let ast = crate::parser::parse(source)?;
    compile_ast(&ast)
}

fn compile_ast(ast: &Ast) -> Result<Expr> {
    Ok(match ast {
        Ast::Null => Box::new(NullLiteral),
        Ast::Boolean(b) => Box::new(ConstLiteral(Element::boolean(*b))),
        Ast::String(s) => Box::new(ConstLiteral(Element::string(s.clone()))),
        Ast::Integer(i) => Box::new(ConstLiteral(Element::integer(*i))),
        Ast::Number(d) => Box::new(ConstLiteral(Element::decimal(*d))),
        Ast::Date(d) => Box::new(ConstLiteral(Element::date(d.clone()))),
        Ast::DateTime(dt) => Box::new(ConstLiteral(Element::datetime(dt.clone()))),
        Ast::Time(t) => Box::new(ConstLiteral(Element::time(t.clone()))),
        Ast::Quantity { value, unit } => {
            Box::new(ConstLiteral(Element::quantity(fhirkit_values::Quantity { value: *value, unit: unit.clone() })))
        }

        Ast::This => Box::new(ThisNode),
        Ast::Index | Ast::Total => Box::new(UnsupportedNode("$index/$total (outside repeat())")),

        Ast::ExternalConstant(name) => Box::new(ExternalConstantNode(external_constant_kind(name)?)),

        Ast::Parenthesized(inner) => compile_ast(inner)?,

        Ast::MemberInvocation(name) => Box::new(MemberInvocationNode(name.clone())),
        Ast::FunctionInvocation { name, args } => compile_function(name, args)?,

        Ast::Invocation { target, invocation } => {
            Box::new(InvocationNode { target: compile_ast(target)?, invocation: compile_ast(invocation)? })
        }
        Ast::Indexer { target, index } => Box::new(IndexerNode { target: compile_ast(target)?, index: compile_ast(index)? }),

        Ast::Polarity { op, expr } => match op {
            PolarityOp::Plus => compile_ast(expr)?,
            PolarityOp::Minus => Box::new(UnsupportedNode("unary minus")),
        },

        Ast::Multiplicative { left, op, right } => {
            let left = compile_ast(left)?;
            let right = compile_ast(right)?;
            match op {
                MultiplicativeOp::Mod => Box::new(ModNode { left, right }),
                MultiplicativeOp::Multiply => Box::new(UnsupportedNode("`*`")),
                MultiplicativeOp::Divide => Box::new(UnsupportedNode("`/`")),
                MultiplicativeOp::Div => Box::new(UnsupportedNode("`div`")),
            }
        }

        Ast::Additive { left, op, right } => {
            let left = compile_ast(left)?;
            let right = compile_ast(right)?;
            match op {
                AdditiveOp::Plus => Box::new(PlusNode { left, right }),
                AdditiveOp::Concat => Box::new(ConcatNode { left, right }),
                AdditiveOp::Minus => Box::new(UnsupportedNode("`-`")),
            }
        }

        Ast::Type { expr, op, type_name } => {
            let target = compile_ast(expr)?;
            match op {
                TypeOp::Is => Box::new(IsNode { target, type_name: type_name.clone() }),
                TypeOp::As => Box::new(AsNode { target, type_name: type_name.clone() }),
            }
        }

        Ast::Union { left, right } => Box::new(UnionNode { left: compile_ast(left)?, right: compile_ast(right)? }),

        Ast::Inequality { left, op, right } => {
            let kind = match op {
                InequalityOp::Lt => InequalityKind::Lt,
                InequalityOp::Le => InequalityKind::Le,
                InequalityOp::Gt => InequalityKind::Gt,
                InequalityOp::Ge => InequalityKind::Ge,
            };
            Box::new(InequalityNode { left: compile_ast(left)?, right: compile_ast(right)?, kind })
        }

        Ast::Equality { left, op, right } => match op {
            EqualityOp::Eq => Box::new(EqualityNode { left: compile_ast(left)?, right: compile_ast(right)?, kind: EqKind::Eq }),
            EqualityOp::Ne => Box::new(EqualityNode { left: compile_ast(left)?, right: compile_ast(right)?, kind: EqKind::Ne }),
            EqualityOp::Equivalent => Box::new(UnsupportedNode("`~`")),
            EqualityOp::NotEquivalent => Box::new(UnsupportedNode("`!~`")),
        },

        Ast::Membership { left, op, right } => match op {
            MembershipOp::In => Box::new(InNode { item: compile_ast(left)?, collection: compile_ast(right)? }),
            MembershipOp::Contains => Box::new(ContainsOpNode { collection: compile_ast(left)?, item: compile_ast(right)? }),
        },

        Ast::And { left, right } => Box::new(AndNode { left: compile_ast(left)?, right: compile_ast(right)? }),
        Ast::Or { left, op, right } => {
            let kind = match op {
                OrOp::Or => OrKind::Or,
                OrOp::Xor => OrKind::Xor,
            };
            Box::new(OrNode { left: compile_ast(left)?, right: compile_ast(right)?, kind })
        }
        Ast::Implies { left, right } => Box::new(ImpliesNode { left: compile_ast(left)?, right: compile_ast(right)? }),
    })
}

fn external_constant_kind(name: &str) -> Result<ExternalConstantKind> {
    Ok(match name {
        "context" => ExternalConstantKind::Context,
        "resource" => ExternalConstantKind::Resource,
        "rootResource" => ExternalConstantKind::RootResource,
        "ucum" => ExternalConstantKind::Ucum,
        other => return Err(Error::UnknownConstant(other.to_string())),
    })
}

/// `ofType(Quantity)`, `is Patient.Observation`, `as(FHIR.Quantity)` all
/// take a type name as a syntactic argument rather than a value
/// expression; the parser still produces it as an `Ast` (a chain of
/// `MemberInvocation`s joined by `Invocation`), so this flattens it back
/// into a dotted name and takes the last segment as the resolvable type.
fn type_name_arg(function: &str, args: &[Ast]) -> Result<String> {
    let [arg] = args else {
        return Err(Error::Arity { function: function.to_string(), expected: "1".into(), got: args.len() });
    };
    fn flatten(ast: &Ast, out: &mut Vec<String>) -> bool {
        match ast {
            Ast::MemberInvocation(name) => {
                out.push(name.clone());
                true
            }
            Ast::Invocation { target, invocation } => flatten(target, out) && flatten(invocation, out),
            _ => false,
        }
    }
    let mut parts = Vec::new();
    if !flatten(arg, &mut parts) || parts.is_empty() {
        return Err(Error::Type(format!("{function} expects a type name")));
    }
    Ok(parts.join("."))
}

fn compile_function(name: &str, args: &[Ast]) -> Result<Expr> {
    macro_rules! arity {
        ($expected:expr) => {
            if args.len() != $expected {
                return Err(Error::Arity { function: name.to_string(), expected: $expected.to_string(), got: args.len() });
            }
        };
    }
    macro_rules! compiled_args {
        () => {
            args.iter().map(compile_ast).collect::<Result<Vec<_>>>()?
        };
    }

    Ok(match name {
        "empty" => {
            arity!(0);
            Box::new(EmptyNode(Box::new(ThisNode)))
        }
        "exists" => {
            if args.len() > 1 {
                return Err(Error::Arity { function: name.to_string(), expected: "0 or 1".into(), got: args.len() });
            }
            let criteria = args.first().map(compile_ast).transpose()?;
            Box::new(ExistsNode { target: Box::new(ThisNode), criteria })
        }
        "all" => {
            arity!(1);
            Box::new(AllNode { target: Box::new(ThisNode), criteria: compile_ast(&args[0])? })
        }
        "allTrue" => {
            arity!(0);
            Box::new(BoolAggNode { target: Box::new(ThisNode), kind: BoolAggKind::AllTrue })
        }
        "anyTrue" => {
            arity!(0);
            Box::new(BoolAggNode { target: Box::new(ThisNode), kind: BoolAggKind::AnyTrue })
        }
        "allFalse" => {
            arity!(0);
            Box::new(BoolAggNode { target: Box::new(ThisNode), kind: BoolAggKind::AllFalse })
        }
        "anyFalse" => {
            arity!(0);
            Box::new(BoolAggNode { target: Box::new(ThisNode), kind: BoolAggKind::AnyFalse })
        }
        "count" => {
            arity!(0);
            Box::new(CountNode(Box::new(ThisNode)))
        }
        "distinct" => {
            arity!(0);
            Box::new(DistinctNode(Box::new(ThisNode)))
        }
        "isDistinct" => {
            arity!(0);
            Box::new(IsDistinctNode(Box::new(ThisNode)))
        }
        "not" => {
            arity!(0);
            Box::new(NotNode(Box::new(ThisNode)))
        }

        "where" => {
            arity!(1);
            Box::new(WhereNode { target: Box::new(ThisNode), criteria: compile_ast(&args[0])? })
        }
        "select" => {
            arity!(1);
            Box::new(SelectNode { target: Box::new(ThisNode), projection: compile_ast(&args[0])? })
        }
        "ofType" => Box::new(OfTypeNode { target: Box::new(ThisNode), type_name: type_name_arg("ofType", args)? }),

        "first" => {
            arity!(0);
            Box::new(FirstNode(Box::new(ThisNode)))
        }
        "tail" => {
            arity!(0);
            Box::new(TailNode(Box::new(ThisNode)))
        }
        "intersect" => {
            arity!(1);
            Box::new(IntersectNode { target: Box::new(ThisNode), other: compile_ast(&args[0])? })
        }
        "last" => Box::new(UnsupportedNode("last()")),
        "skip" => Box::new(UnsupportedNode("skip()")),
        "take" => Box::new(UnsupportedNode("take()")),
        "single" => Box::new(UnsupportedNode("single()")),
        "subsetOf" => Box::new(UnsupportedNode("subsetOf()")),
        "supersetOf" => Box::new(UnsupportedNode("supersetOf()")),

        "union" => {
            arity!(1);
            Box::new(UnionNode { left: Box::new(ThisNode), right: compile_ast(&args[0])? })
        }
        "combine" => {
            arity!(1);
            Box::new(CombineNode { target: Box::new(ThisNode), other: compile_ast(&args[0])? })
        }

        "is" => Box::new(IsNode { target: Box::new(ThisNode), type_name: type_name_arg("is", args)? }),
        "as" => Box::new(AsNode { target: Box::new(ThisNode), type_name: type_name_arg("as", args)? }),

        "children" => {
            arity!(0);
            Box::new(ChildrenNode)
        }
        "descendants" => {
            arity!(0);
            Box::new(DescendantsNode)
        }

        "iif" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(Error::Arity { function: name.to_string(), expected: "2 or 3".into(), got: args.len() });
            }
            let mut compiled = compiled_args!();
            let else_branch = if compiled.len() == 3 { Some(compiled.remove(2)) } else { None };
            let then_branch = compiled.remove(1);
            Box::new(IifNode { condition: compiled.remove(0), then_branch, else_branch })
        }
        "toInteger" => {
            arity!(0);
            Box::new(ToIntegerNode(Box::new(ThisNode)))
        }
        "toString" => {
            arity!(0);
            Box::new(ToStringNode(Box::new(ThisNode)))
        }
        "toDecimal" => Box::new(UnsupportedNode("toDecimal()")),
        "toDate" => Box::new(UnsupportedNode("toDate()")),
        "toTime" => Box::new(UnsupportedNode("toTime()")),
        "toDateTime" => Box::new(UnsupportedNode("toDateTime()")),

        "indexOf" => {
            arity!(1);
            Box::new(IndexOfNode { target: Box::new(ThisNode), substring: compile_ast(&args[0])? })
        }
        "substring" => {
            if args.is_empty() || args.len() > 2 {
                return Err(Error::Arity { function: name.to_string(), expected: "1 or 2".into(), got: args.len() });
            }
            let mut compiled = compiled_args!();
            let length = if compiled.len() == 2 { Some(compiled.remove(1)) } else { None };
            Box::new(SubstringNode { target: Box::new(ThisNode), start: compiled.remove(0), length })
        }
        "startsWith" => {
            arity!(1);
            Box::new(StringPredicateNode { target: Box::new(ThisNode), arg: compile_ast(&args[0])?, kind: StringPredicateKind::StartsWith })
        }
        "contains" => {
            arity!(1);
            Box::new(StringPredicateNode { target: Box::new(ThisNode), arg: compile_ast(&args[0])?, kind: StringPredicateKind::Contains })
        }
        "matches" => {
            arity!(1);
            Box::new(MatchesNode { target: Box::new(ThisNode), pattern: compile_ast(&args[0])? })
        }
        "replaceMatches" => {
            arity!(2);
            let compiled = compiled_args!();
            let mut compiled = compiled.into_iter();
            Box::new(ReplaceMatchesNode {
                target: Box::new(ThisNode),
                pattern: compiled.next().unwrap(),
                replacement: compiled.next().unwrap(),
            })
        }
        "length" => {
            arity!(0);
            Box::new(LengthNode(Box::new(ThisNode)))
        }

        "extension" => {
            arity!(1);
            Box::new(ExtensionNode { target: Box::new(ThisNode), url: compile_ast(&args[0])? })
        }
        "hasValue" => {
            arity!(0);
            Box::new(HasValueNode(Box::new(ThisNode)))
        }
        "getValue" => {
            arity!(0);
            Box::new(GetValueNode(Box::new(ThisNode)))
        }
        "conformsTo" => {
            arity!(1);
            Box::new(ConformsToNode { target: Box::new(ThisNode), profile_url: compile_ast(&args[0])? })
        }
        "htmlChecks" => {
            arity!(0);
            Box::new(HtmlChecksNode)
        }
        "resolve" => {
            arity!(0);
            Box::new(ResolveNode(Box::new(ThisNode)))
        }

        other => return Err(Error::UnknownFunction(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvalContext;
    use fhirkit_values::Collection;

    #[test]
    fn compiles_and_evaluates_literal() {
        let expr = compile("true").unwrap();
        let ctx = EvalContext::new(Element::boolean(true));
        let result = expr.eval(&ctx, &Collection::empty()).unwrap();
        assert!(result.is_truthy());
    }

    #[test]
    fn rejects_unknown_function() {
        let err = compile("frobnicate()").unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = compile("where()").unwrap_err();
        assert!(matches!(err, Error::Arity { .. }));
    }

    #[test]
    fn where_and_count_compose() {
        let expr = compile("(1 | 2 | 3).where($this > 1).count()").unwrap();
        let ctx = EvalContext::new(Element::integer(0));
        let result = expr.eval(&ctx, &Collection::empty()).unwrap();
        assert_eq!(result.single().unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn mod_on_integers() {
        let expr = compile("7 mod 3").unwrap();
        let ctx = EvalContext::new(Element::integer(0));
        let result = expr.eval(&ctx, &Collection::empty()).unwrap();
        assert_eq!(result.single().unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn unsupported_multiply_errors_at_eval_not_compile() {
        let expr = compile("2 * 3").unwrap();
        let ctx = EvalContext::new(Element::integer(0));
        assert!(expr.eval(&ctx, &Collection::empty()).is_err());
    }
}
